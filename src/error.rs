use thiserror::Error;

/// Causes that abort one community's reconciliation cycle before any
/// mutation has been attempted.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no ledger page window contains the current time for ledger {ledger_id}")]
    PageNotFound { ledger_id: String },
    #[error("community {community_id} is missing required config: {what}")]
    MissingConfig { community_id: String, what: String },
    #[error("failed to read ledger {ledger_id} ({section}): {reason}")]
    LedgerRead {
        ledger_id: String,
        section: String,
        reason: String,
    },
    #[error("failed to list members of community {community_id}: {reason}")]
    MemberList {
        community_id: String,
        reason: String,
    },
    #[error("another sync cycle for community {community_id} is already running")]
    CycleBusy { community_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorCode {
    E101PageNotFound,
    E102MissingConfig,
    E103LedgerRead,
    E104MemberList,
    E105CycleBusy,
}

impl SyncErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E101PageNotFound => "E101_PAGE_NOT_FOUND",
            Self::E102MissingConfig => "E102_MISSING_CONFIG",
            Self::E103LedgerRead => "E103_LEDGER_READ",
            Self::E104MemberList => "E104_MEMBER_LIST",
            Self::E105CycleBusy => "E105_CYCLE_BUSY",
        }
    }
}

impl SyncError {
    pub fn code(&self) -> SyncErrorCode {
        match self {
            Self::PageNotFound { .. } => SyncErrorCode::E101PageNotFound,
            Self::MissingConfig { .. } => SyncErrorCode::E102MissingConfig,
            Self::LedgerRead { .. } => SyncErrorCode::E103LedgerRead,
            Self::MemberList { .. } => SyncErrorCode::E104MemberList,
            Self::CycleBusy { .. } => SyncErrorCode::E105CycleBusy,
        }
    }

    pub fn missing_config(community_id: &str, what: impl Into<String>) -> Self {
        Self::MissingConfig {
            community_id: community_id.to_string(),
            what: what.into(),
        }
    }
}

/// Finds the first `SyncError` in an `anyhow` chain and returns its code.
pub fn classify(err: &anyhow::Error) -> Option<SyncErrorCode> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SyncError>())
        .map(SyncError::code)
}
