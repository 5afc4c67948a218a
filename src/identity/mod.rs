pub mod roblox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use roblox::RobloxClient;

/// Account on the external identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: u64,
    pub name: String,
}

impl ExternalIdentity {
    pub fn profile_url(&self) -> String {
        format!("https://www.roblox.com/users/{}/profile", self.id)
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("identity service returned {status} from {endpoint}")]
    Status { endpoint: &'static str, status: u16 },
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exact username lookup; `Ok(None)` when no account has that name.
    async fn lookup_username(&self, username: &str) -> Result<Option<ExternalIdentity>, IdentityError>;
    /// Current free-text profile description.
    async fn fetch_description(&self, id: u64) -> Result<String, IdentityError>;
    /// Headshot image URL, if the service has one.
    async fn fetch_avatar(&self, id: u64) -> Result<Option<String>, IdentityError>;
}
