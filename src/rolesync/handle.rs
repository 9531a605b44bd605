use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

static HANDLE_RE: OnceLock<Regex> = OnceLock::new();

fn handle_re() -> &'static Regex {
    HANDLE_RE.get_or_init(|| Regex::new(r"(.+)#(\d{4})$").expect("handle pattern is valid"))
}

/// `username#discriminator` as written in the ledger or reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Handle {
    pub username: String,
    pub discriminator: String,
}

impl Handle {
    pub fn new(username: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            discriminator: discriminator.into(),
        }
    }

    /// Splits on the trailing four-digit discriminator; the prefix match is
    /// greedy, so `a#b#8388` yields (`a#b`, `8388`). Without a discriminator
    /// the whole input becomes the username.
    pub fn parse(raw: &str) -> Self {
        match handle_re().captures(raw) {
            Some(caps) => Self::new(&caps[1], &caps[2]),
            None => Self::new(raw, ""),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.username.is_empty()
    }

    pub fn has_discriminator(&self) -> bool {
        !self.discriminator.is_empty()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_discriminator() {
            write!(f, "{}#{}", self.username, self.discriminator)
        } else {
            f.write_str(&self.username)
        }
    }
}
