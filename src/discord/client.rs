use crate::rolesync::directory::{ChatDirectory, Member};
use crate::rolesync::handle::Handle;
use crate::rolesync::util::{api_url, truncate_with_ellipsis};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_LENGTH;
use serde_json::Value;
use std::env;
use std::thread;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const MEMBER_PAGE_LIMIT: usize = 1000;
const MAX_RATE_LIMIT_RETRIES: usize = 3;
const MAX_RETRY_AFTER_SECS: f64 = 60.0;

pub struct DiscordClient {
    client: Client,
    api_base: String,
    token: String,
}

impl DiscordClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    /// Reads `ROLESYNC_DISCORD_TOKEN` and the optional `ROLESYNC_DISCORD_API_BASE`.
    pub fn from_env() -> Result<Self> {
        let token = env::var("ROLESYNC_DISCORD_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("ROLESYNC_DISCORD_TOKEN is not set")?;
        let api_base = env::var("ROLESYNC_DISCORD_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::new(&api_base, &token)
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        api_url(&self.api_base, segments)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bot {}", self.token))
    }

    /// Sends the request, waiting out 429s a bounded number of times.
    fn send(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let response = self
                .authorized(build())
                .send()
                .with_context(|| format!("discord {what} request failed"))?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS
                && attempt < MAX_RATE_LIMIT_RETRIES
            {
                attempt += 1;
                let body: Value = response.json().unwrap_or(Value::Null);
                let wait = retry_after(&body);
                tracing::debug!(what, attempt, wait_secs = wait.as_secs_f64(), "discord rate limited");
                thread::sleep(wait);
                continue;
            }
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().unwrap_or_default();
                anyhow::bail!(
                    "discord {what} failed with status {status}: {}",
                    truncate_with_ellipsis(&body, 200)
                );
            }
            return Ok(response);
        }
    }
}

fn retry_after(body: &Value) -> Duration {
    let secs = body
        .get("retry_after")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
        .clamp(0.0, MAX_RETRY_AFTER_SECS);
    Duration::from_secs_f64(secs)
}

/// Parses one `GET /guilds/{id}/members` page.
pub fn parse_member_page(body: &Value) -> Result<Vec<Member>> {
    let items = body
        .as_array()
        .context("discord member list should be an array")?;
    let mut members = Vec::with_capacity(items.len());
    for item in items {
        let user = item.get("user").context("discord member missing user")?;
        let user_id = user
            .get("id")
            .and_then(Value::as_str)
            .context("discord member missing user.id")?;
        let username = user.get("username").and_then(Value::as_str).unwrap_or("");
        let discriminator = user
            .get("discriminator")
            .and_then(Value::as_str)
            .unwrap_or("0");
        let roles = item
            .get("roles")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        members.push(Member {
            user_id: user_id.to_string(),
            handle: Handle::new(username, discriminator),
            roles,
        });
    }
    Ok(members)
}

/// Cursor for the next page, or `None` when enumeration is finished.
pub fn next_cursor(page: &[Member], previous: &str) -> Option<String> {
    if page.len() < MEMBER_PAGE_LIMIT {
        return None;
    }
    let last = page.last()?;
    if last.user_id == previous {
        return None;
    }
    Some(last.user_id.clone())
}

impl ChatDirectory for DiscordClient {
    fn list_members(&self, community_id: &str) -> Result<Vec<Member>> {
        let mut out = Vec::new();
        let mut after = "0".to_string();
        loop {
            let mut url = self.url(&["guilds", community_id, "members"])?;
            url.query_pairs_mut()
                .append_pair("limit", &MEMBER_PAGE_LIMIT.to_string())
                .append_pair("after", &after);
            let response = self.send("list members", || self.client.get(url.clone()))?;
            let body: Value = response.json().context("discord member list is not json")?;
            let page = parse_member_page(&body)?;
            let cursor = next_cursor(&page, &after);
            out.extend(page);
            match cursor {
                Some(next) => after = next,
                None => break,
            }
        }
        tracing::debug!(community_id, members = out.len(), "listed discord members");
        Ok(out)
    }

    fn grant_role(&self, community_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        let url = self.url(&["guilds", community_id, "members", user_id, "roles", role_id])?;
        self.send("grant role", || {
            self.client.put(url.clone()).header(CONTENT_LENGTH, 0)
        })?;
        Ok(())
    }

    fn revoke_role(&self, community_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        let url = self.url(&["guilds", community_id, "members", user_id, "roles", role_id])?;
        self.send("revoke role", || self.client.delete(url.clone()))?;
        Ok(())
    }

    fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        let url = self.url(&["channels", channel_id, "messages"])?;
        let payload = serde_json::json!({ "content": content });
        self.send("send message", || self.client.post(url.clone()).json(&payload))?;
        Ok(())
    }
}
