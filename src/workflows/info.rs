//! Read-only lookups behind `/userinfo`, `/serverinfo`, `/avatar` and `/membercount`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::WorkflowError;
use crate::config::GuildkeeperConfig;
use crate::discord::types::*;
use crate::discord::PlatformOps;

const THUMBNAIL_SIZE: u16 = 256;
const AVATAR_SIZE: u16 = 512;

fn quoted(value: impl std::fmt::Display) -> String {
    format!(">>> {value}")
}

fn relative(at: DateTime<Utc>) -> String {
    quoted(format!("<t:{}:R>", at.timestamp()))
}

pub struct InfoDesk {
    platform: Arc<dyn PlatformOps>,
    config: Arc<GuildkeeperConfig>,
}

impl InfoDesk {
    pub fn new(platform: Arc<dyn PlatformOps>, config: Arc<GuildkeeperConfig>) -> Self {
        Self { platform, config }
    }

    fn embed(&self, title: impl Into<String>) -> Embed {
        Embed::new().title(title).color(self.config.branding.color)
    }

    /// Account details, plus membership details when the user is in `guild`.
    pub async fn user_info(&self, guild: Option<GuildId>, user: UserId) -> Result<MessagePayload, WorkflowError> {
        let profile = self.platform.fetch_user(user).await?;
        let mut embed = self
            .embed("User Information")
            .thumbnail(profile.avatar_url(THUMBNAIL_SIZE))
            .field("Username", quoted(&profile.username), true)
            .field("User ID", quoted(profile.id), true)
            .field("Account Created", relative(profile.id.created_at()), true);

        let Some(guild) = guild else {
            return Ok(MessagePayload::embeds(vec![embed]));
        };
        let member = match self.platform.fetch_member(guild, user).await {
            Ok(member) => member,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(error = %e, %user, "Could not load member details");
                }
                debug!(%user, "User is not a member; showing account details only");
                return Ok(MessagePayload::embeds(vec![embed]));
            }
        };
        let server = self.platform.fetch_guild(guild).await?;

        if let Some(joined) = member.joined_at {
            embed = embed.field("Joined Server", relative(joined), true);
        }
        let top_role = server
            .highest_role(&member.roles)
            .map_or_else(|| "None".to_string(), |role| role.id.mention());
        embed = embed
            .field("Nickname", quoted(member.nick.as_deref().unwrap_or("None")), true)
            .field("Top Role", quoted(top_role), true)
            .field("Roles", quoted(format!("{} roles", member.roles.len())), true);
        Ok(MessagePayload::embeds(vec![embed]))
    }

    pub async fn server_info(&self, guild: GuildId) -> Result<MessagePayload, WorkflowError> {
        let server = self.platform.fetch_guild(guild).await?;
        let channels = self.platform.count_guild_channels(guild).await?;
        let members = server
            .approximate_member_count
            .map_or_else(|| "Unknown".to_string(), |count| count.to_string());

        let mut embed = self
            .embed("Server Information")
            .field("Server Name", quoted(&server.name), true)
            .field("Server ID", quoted(server.id), true)
            .field("Owner", quoted(server.owner_id.mention()), true)
            .field("Members", quoted(members), true)
            .field("Channels", quoted(channels), true)
            .field("Roles", quoted(server.roles.len()), true)
            .field("Created", relative(server.id.created_at()), true)
            .field("Boost Level", quoted(format!("Level {}", server.premium_tier)), true)
            .field("Boosts", quoted(server.premium_subscription_count.unwrap_or(0)), true);
        if let Some(icon) = server.icon_url(THUMBNAIL_SIZE) {
            embed = embed.thumbnail(icon);
        }
        Ok(MessagePayload::embeds(vec![embed]))
    }

    pub async fn avatar(&self, user: UserId) -> Result<MessagePayload, WorkflowError> {
        let profile = self.platform.fetch_user(user).await?;
        let embed = self
            .embed(format!("{}'s Avatar", profile.username))
            .image(profile.avatar_url(AVATAR_SIZE))
            .timestamp(Utc::now());
        Ok(MessagePayload::embeds(vec![embed]))
    }

    pub async fn member_count(&self, guild: GuildId) -> Result<MessagePayload, WorkflowError> {
        let server = self.platform.fetch_guild(guild).await?;
        let count = server.approximate_member_count.ok_or_else(|| {
            WorkflowError::external("count members", "the platform did not report a member count")
        })?;
        let embed = self
            .embed("Member Count")
            .description(quoted(format!("**{}** has **{count}** members.", server.name)))
            .timestamp(Utc::now());
        Ok(MessagePayload::embeds(vec![embed]))
    }
}
