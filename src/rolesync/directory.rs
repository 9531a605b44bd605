use crate::rolesync::handle::Handle;
use anyhow::Result;

/// A community member as enumerated by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    pub handle: Handle,
    pub roles: Vec<String>,
}

impl Member {
    pub fn has_role(&self, role_id: &str) -> bool {
        self.roles.iter().any(|r| r == role_id)
    }
}

/// Chat Directory capability.
pub trait ChatDirectory {
    fn list_members(&self, community_id: &str) -> Result<Vec<Member>>;
    fn grant_role(&self, community_id: &str, user_id: &str, role_id: &str) -> Result<()>;
    fn revoke_role(&self, community_id: &str, user_id: &str, role_id: &str) -> Result<()>;
    fn send_message(&self, channel_id: &str, content: &str) -> Result<()>;
}
