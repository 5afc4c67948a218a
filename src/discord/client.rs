use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{multipart, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::errors::PlatformError;
use super::types::*;
use crate::observability::{platform_metrics, ApiService, CallOutcome};

/// Chat platform operations used by the workflows.
///
/// Kept as a trait so workflows can be exercised against a recording fake.
#[async_trait]
pub trait PlatformOps: Send + Sync {
    async fn send_message(&self, channel: ChannelId, message: &MessagePayload) -> Result<MessageId, PlatformError>;
    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        payload: &MessagePayload,
    ) -> Result<(), PlatformError>;
    async fn send_file(&self, channel: ChannelId, content: &str, file: &FileUpload) -> Result<MessageId, PlatformError>;
    async fn send_direct_message(&self, user: UserId, message: &MessagePayload) -> Result<MessageId, PlatformError>;

    async fn create_channel(&self, guild: GuildId, channel: &NewChannel) -> Result<ChannelId, PlatformError>;
    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError>;
    async fn fetch_recent_messages(&self, channel: ChannelId, limit: u8) -> Result<Vec<ChannelMessage>, PlatformError>;
    /// Deletes the given messages and returns how many were removed.
    async fn delete_messages(&self, channel: ChannelId, messages: &[MessageId]) -> Result<usize, PlatformError>;
    async fn edit_permission_overwrite(
        &self,
        channel: ChannelId,
        overwrite: &PermissionOverwrite,
        reason: Option<&str>,
    ) -> Result<(), PlatformError>;
    async fn set_slowmode(&self, channel: ChannelId, seconds: u32) -> Result<(), PlatformError>;

    async fn fetch_member(&self, guild: GuildId, user: UserId) -> Result<Member, PlatformError>;
    async fn fetch_user(&self, user: UserId) -> Result<User, PlatformError>;
    /// Guild with approximate member counts and its role list.
    async fn fetch_guild(&self, guild: GuildId) -> Result<Guild, PlatformError>;
    async fn count_guild_channels(&self, guild: GuildId) -> Result<usize, PlatformError>;
    async fn add_role(&self, guild: GuildId, user: UserId, role: RoleId, reason: Option<&str>)
        -> Result<(), PlatformError>;
    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: Option<&str>,
    ) -> Result<(), PlatformError>;
    async fn set_nickname(&self, guild: GuildId, user: UserId, nickname: Option<&str>) -> Result<(), PlatformError>;
    async fn set_voice_state(
        &self,
        guild: GuildId,
        user: UserId,
        edit: VoiceStateEdit,
        reason: Option<&str>,
    ) -> Result<(), PlatformError>;
    async fn ban_member(
        &self,
        guild: GuildId,
        user: UserId,
        delete_message_seconds: u32,
        reason: Option<&str>,
    ) -> Result<(), PlatformError>;
    async fn kick_member(&self, guild: GuildId, user: UserId, reason: Option<&str>) -> Result<(), PlatformError>;
    /// `None` lifts an active timeout.
    async fn timeout_member(
        &self,
        guild: GuildId,
        user: UserId,
        until: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> Result<(), PlatformError>;

    async fn edit_original_response(&self, token: &str, message: &MessagePayload) -> Result<(), PlatformError>;
    async fn register_guild_commands(&self, guild: GuildId, commands: &[CommandSpec]) -> Result<(), PlatformError>;
}

const REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(5) {
    Some(rate) => rate,
    None => panic!("rate must be non-zero"),
};
const BURST: NonZeroU32 = match NonZeroU32::new(10) {
    Some(burst) => burst,
    None => panic!("burst must be non-zero"),
};

/// Messages older than this cannot be bulk deleted.
pub const BULK_DELETE_MAX_AGE: chrono::Duration = chrono::Duration::days(14);

#[derive(Debug, Deserialize)]
struct Created<T> {
    id: T,
}

/// Rate-limited REST client for the Discord v10 API.
#[derive(Debug)]
pub struct DiscordClient {
    http: reqwest::Client,
    base_url: String,
    application_id: ApplicationId,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl DiscordClient {
    pub fn new(token: &str, application_id: ApplicationId, base_url: impl Into<String>) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| PlatformError::InvalidRequest("bot token contains invalid characters".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("DiscordBot (guildkeeper, ", env!("CARGO_PKG_VERSION"), ")")),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()?;

        let quota = Quota::per_second(REQUESTS_PER_SECOND).allow_burst(BURST);

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            application_id,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<Response, PlatformError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;

        let metrics = platform_metrics();
        let started = Instant::now();
        debug!(operation, "Executing platform API request");

        let response = request.send().await.inspect_err(|_| {
            metrics.record_call(ApiService::Discord, operation, CallOutcome::Failed, started.elapsed())
        })?;
        let status = response.status();
        let outcome = match status.as_u16() {
            _ if status.is_success() => CallOutcome::Success,
            429 => CallOutcome::RateLimited,
            _ => CallOutcome::Failed,
        };
        metrics.record_call(ApiService::Discord, operation, outcome, started.elapsed());
        if outcome == CallOutcome::Success {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::from_status(operation, status.as_u16(), &body))
    }

    async fn execute_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, PlatformError> {
        let response = self.execute(operation, request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Attaches the audit log reason header, percent-encoded as the platform expects.
fn with_reason(request: RequestBuilder, reason: Option<&str>) -> RequestBuilder {
    match reason.filter(|r| !r.is_empty()) {
        Some(reason) => {
            let encoded = url::form_urlencoded::byte_serialize(reason.as_bytes())
                .collect::<String>()
                .replace('+', "%20");
            request.header("X-Audit-Log-Reason", encoded)
        }
        None => request,
    }
}

#[async_trait]
impl PlatformOps for DiscordClient {
    async fn send_message(&self, channel: ChannelId, message: &MessagePayload) -> Result<MessageId, PlatformError> {
        let request = self
            .request(Method::POST, &format!("/channels/{channel}/messages"))
            .json(message);
        let created: Created<MessageId> = self.execute_json("send message", request).await?;
        Ok(created.id)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        payload: &MessagePayload,
    ) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PATCH, &format!("/channels/{channel}/messages/{message}"))
            .json(payload);
        self.execute("edit message", request).await?;
        Ok(())
    }

    async fn send_file(
        &self,
        channel: ChannelId,
        content: &str,
        file: &FileUpload,
    ) -> Result<MessageId, PlatformError> {
        let payload = json!({
            "content": content,
            "attachments": [{"id": 0, "filename": file.filename}],
        });
        let part = multipart::Part::bytes(file.bytes.clone())
            .file_name(file.filename.clone())
            .mime_str("text/plain")?;
        let form = multipart::Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", part);
        let request = self
            .request(Method::POST, &format!("/channels/{channel}/messages"))
            .multipart(form);
        let created: Created<MessageId> = self.execute_json("upload file", request).await?;
        Ok(created.id)
    }

    async fn send_direct_message(&self, user: UserId, message: &MessagePayload) -> Result<MessageId, PlatformError> {
        let request = self
            .request(Method::POST, "/users/@me/channels")
            .json(&json!({ "recipient_id": user }));
        let dm: Created<ChannelId> = self.execute_json("open direct message", request).await?;
        self.send_message(dm.id, message).await
    }

    async fn create_channel(&self, guild: GuildId, channel: &NewChannel) -> Result<ChannelId, PlatformError> {
        let request = self
            .request(Method::POST, &format!("/guilds/{guild}/channels"))
            .json(channel);
        let created: Created<ChannelId> = self.execute_json("create channel", request).await?;
        Ok(created.id)
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError> {
        let request = self.request(Method::DELETE, &format!("/channels/{channel}"));
        self.execute("delete channel", request).await?;
        Ok(())
    }

    async fn fetch_recent_messages(&self, channel: ChannelId, limit: u8) -> Result<Vec<ChannelMessage>, PlatformError> {
        let request = self
            .request(Method::GET, &format!("/channels/{channel}/messages"))
            .query(&[("limit", limit.clamp(1, 100))]);
        self.execute_json("fetch messages", request).await
    }

    async fn delete_messages(&self, channel: ChannelId, messages: &[MessageId]) -> Result<usize, PlatformError> {
        match messages {
            [] => Ok(0),
            [single] => {
                let request = self.request(Method::DELETE, &format!("/channels/{channel}/messages/{single}"));
                self.execute("delete message", request).await?;
                Ok(1)
            }
            many => {
                let request = self
                    .request(Method::POST, &format!("/channels/{channel}/messages/bulk-delete"))
                    .json(&json!({ "messages": many }));
                self.execute("bulk delete messages", request).await?;
                Ok(many.len())
            }
        }
    }

    async fn edit_permission_overwrite(
        &self,
        channel: ChannelId,
        overwrite: &PermissionOverwrite,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let request = self
            .request(
                Method::PUT,
                &format!("/channels/{channel}/permissions/{}", overwrite.target_id()),
            )
            .json(overwrite);
        self.execute("edit channel permissions", with_reason(request, reason))
            .await?;
        Ok(())
    }

    async fn set_slowmode(&self, channel: ChannelId, seconds: u32) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PATCH, &format!("/channels/{channel}"))
            .json(&json!({ "rate_limit_per_user": seconds }));
        self.execute("set slowmode", request).await?;
        Ok(())
    }

    async fn fetch_member(&self, guild: GuildId, user: UserId) -> Result<Member, PlatformError> {
        let request = self.request(Method::GET, &format!("/guilds/{guild}/members/{user}"));
        self.execute_json("fetch member", request).await
    }

    async fn fetch_user(&self, user: UserId) -> Result<User, PlatformError> {
        let request = self.request(Method::GET, &format!("/users/{user}"));
        self.execute_json("fetch user", request).await
    }

    async fn fetch_guild(&self, guild: GuildId) -> Result<Guild, PlatformError> {
        let request = self
            .request(Method::GET, &format!("/guilds/{guild}"))
            .query(&[("with_counts", "true")]);
        self.execute_json("fetch guild", request).await
    }

    async fn count_guild_channels(&self, guild: GuildId) -> Result<usize, PlatformError> {
        let request = self.request(Method::GET, &format!("/guilds/{guild}/channels"));
        let channels: Vec<serde::de::IgnoredAny> = self.execute_json("fetch guild channels", request).await?;
        Ok(channels.len())
    }

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let request = self.request(
            Method::PUT,
            &format!("/guilds/{guild}/members/{user}/roles/{role}"),
        );
        self.execute("add role", with_reason(request, reason)).await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let request = self.request(
            Method::DELETE,
            &format!("/guilds/{guild}/members/{user}/roles/{role}"),
        );
        self.execute("remove role", with_reason(request, reason)).await?;
        Ok(())
    }

    async fn set_nickname(&self, guild: GuildId, user: UserId, nickname: Option<&str>) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PATCH, &format!("/guilds/{guild}/members/{user}"))
            .json(&json!({ "nick": nickname }));
        self.execute("set nickname", request).await?;
        Ok(())
    }

    async fn set_voice_state(
        &self,
        guild: GuildId,
        user: UserId,
        edit: VoiceStateEdit,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PATCH, &format!("/guilds/{guild}/members/{user}"))
            .json(&edit);
        self.execute("edit voice state", with_reason(request, reason)).await?;
        Ok(())
    }

    async fn ban_member(
        &self,
        guild: GuildId,
        user: UserId,
        delete_message_seconds: u32,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PUT, &format!("/guilds/{guild}/bans/{user}"))
            .json(&json!({ "delete_message_seconds": delete_message_seconds }));
        self.execute("ban member", with_reason(request, reason)).await?;
        Ok(())
    }

    async fn kick_member(&self, guild: GuildId, user: UserId, reason: Option<&str>) -> Result<(), PlatformError> {
        let request = self.request(Method::DELETE, &format!("/guilds/{guild}/members/{user}"));
        self.execute("kick member", with_reason(request, reason)).await?;
        Ok(())
    }

    async fn timeout_member(
        &self,
        guild: GuildId,
        user: UserId,
        until: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PATCH, &format!("/guilds/{guild}/members/{user}"))
            .json(&json!({ "communication_disabled_until": until.map(|at| at.to_rfc3339()) }));
        self.execute("timeout member", with_reason(request, reason)).await?;
        Ok(())
    }

    async fn edit_original_response(&self, token: &str, message: &MessagePayload) -> Result<(), PlatformError> {
        let request = self
            .request(
                Method::PATCH,
                &format!("/webhooks/{}/{token}/messages/@original", self.application_id),
            )
            .json(message);
        self.execute("edit interaction response", request).await?;
        Ok(())
    }

    async fn register_guild_commands(&self, guild: GuildId, commands: &[CommandSpec]) -> Result<(), PlatformError> {
        let request = self
            .request(
                Method::PUT,
                &format!("/applications/{}/guilds/{guild}/commands", self.application_id),
            )
            .json(commands);
        self.execute("register commands", request).await?;
        Ok(())
    }
}
