use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{ExternalIdentity, IdentityError, IdentityProvider};
use crate::config::VerificationConfig;
use crate::observability::{platform_metrics, ApiService, CallOutcome};

#[derive(Debug, Deserialize)]
struct UsernameLookup {
    #[serde(default)]
    data: Vec<UsernameMatch>,
}

#[derive(Debug, Deserialize)]
struct UsernameMatch {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailBatch {
    #[serde(default)]
    data: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    #[serde(rename = "imageUrl", default)]
    image_url: Option<String>,
}

/// Roblox users and thumbnails API client.
#[derive(Debug, Clone)]
pub struct RobloxClient {
    http: reqwest::Client,
    users_base_url: String,
    thumbnails_base_url: String,
    avatars: Cache<u64, Option<String>>,
}

impl RobloxClient {
    pub fn new(settings: &VerificationConfig) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let avatars = Cache::builder()
            .max_capacity(settings.avatar_cache_capacity)
            .time_to_live(Duration::from_secs(300))
            .build();

        Ok(Self {
            http,
            users_base_url: settings.users_api_url.trim_end_matches('/').to_string(),
            thumbnails_base_url: settings.thumbnails_api_url.trim_end_matches('/').to_string(),
            avatars,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, IdentityError> {
        let started = Instant::now();
        let response = request.send().await.inspect_err(|_| {
            platform_metrics().record_call(ApiService::Roblox, endpoint, CallOutcome::Failed, started.elapsed())
        })?;
        let status = response.status();
        let outcome = match status.as_u16() {
            _ if status.is_success() => CallOutcome::Success,
            429 => CallOutcome::RateLimited,
            _ => CallOutcome::Failed,
        };
        platform_metrics().record_call(ApiService::Roblox, endpoint, outcome, started.elapsed());
        if outcome != CallOutcome::Success {
            return Err(IdentityError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl IdentityProvider for RobloxClient {
    async fn lookup_username(&self, username: &str) -> Result<Option<ExternalIdentity>, IdentityError> {
        let request = self
            .http
            .post(format!("{}/v1/usernames/users", self.users_base_url))
            .json(&json!({ "usernames": [username], "excludeBannedUsers": true }));
        let lookup: UsernameLookup = self.get_json("usernames/users", request).await?;

        let found = lookup
            .data
            .into_iter()
            .next()
            .map(|m| ExternalIdentity { id: m.id, name: m.name });
        debug!(username, found = found.is_some(), "Roblox username lookup");
        Ok(found)
    }

    async fn fetch_description(&self, id: u64) -> Result<String, IdentityError> {
        let request = self.http.get(format!("{}/v1/users/{id}", self.users_base_url));
        let profile: UserProfile = self.get_json("users", request).await?;
        Ok(profile.description.unwrap_or_default())
    }

    async fn fetch_avatar(&self, id: u64) -> Result<Option<String>, IdentityError> {
        if let Some(cached) = self.avatars.get(&id).await {
            platform_metrics().record_avatar_cache(true);
            return Ok(cached);
        }
        platform_metrics().record_avatar_cache(false);

        let request = self
            .http
            .get(format!("{}/v1/users/avatar-headshot", self.thumbnails_base_url))
            .query(&[
                ("userIds", id.to_string()),
                ("size", "150x150".to_string()),
                ("format", "Png".to_string()),
            ]);
        let batch: ThumbnailBatch = self.get_json("avatar-headshot", request).await?;
        let url = batch.data.into_iter().next().and_then(|t| t.image_url);

        self.avatars.insert(id, url.clone()).await;
        Ok(url)
    }
}
