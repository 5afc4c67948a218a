use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;

use super::{Actor, SideEffect, Transition, WorkflowError};
use crate::audit::AuditSink;
use crate::config::GuildkeeperConfig;
use crate::discord::client::BULK_DELETE_MAX_AGE;
use crate::discord::embeds::branded;
use crate::discord::types::*;
use crate::discord::{PlatformError, PlatformOps};
use crate::storage::NewLogEntry;

/// Seconds of message history removed by `/ban delete_messages:true`.
const BAN_DELETE_SECONDS: u32 = 7 * 24 * 60 * 60;
/// Platform ceiling for a member timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(28 * 24 * 60 * 60);
pub const MAX_SLOWMODE_SECONDS: i64 = 21_600;
/// Platform error code for voice edits on a member outside voice.
const NOT_IN_VOICE: u64 = 40032;
const DEFAULT_REASON: &str = "No reason provided";

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)(s|m|h|d)$").expect("duration pattern is valid"))
}

/// Parses `10s`, `5m`, `2h` or `1d`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let captures = duration_pattern().captures(raw.trim())?;
    let value: u64 = captures[1].parse().ok()?;
    let unit = match &captures[2] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return None,
    };
    value.checked_mul(unit).map(Duration::from_secs)
}

/// Renders a duration in its largest whole unit, e.g. `2 hour(s)`.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;
    if days > 0 {
        format!("{days} day(s)")
    } else if hours > 0 {
        format!("{hours} hour(s)")
    } else if minutes > 0 {
        format!("{minutes} minute(s)")
    } else {
        format!("{seconds} second(s)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUser {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationCommand {
    Ban {
        target: TargetUser,
        reason: Option<String>,
        delete_messages: bool,
    },
    Kick {
        target: TargetUser,
        reason: Option<String>,
    },
    Timeout {
        target: TargetUser,
        duration: String,
        reason: Option<String>,
    },
    Untimeout {
        target: TargetUser,
    },
    Mute {
        target: TargetUser,
        reason: Option<String>,
    },
    Unmute {
        target: TargetUser,
    },
    Deafen {
        target: TargetUser,
        reason: Option<String>,
    },
    Undeafen {
        target: TargetUser,
    },
    Warn {
        target: TargetUser,
        reason: String,
    },
    Clear {
        amount: i64,
        author: Option<TargetUser>,
    },
    Slowmode {
        seconds: i64,
    },
    Lock {
        reason: Option<String>,
    },
    Unlock,
    Role {
        action: RoleAction,
        target: TargetUser,
        role: RoleId,
    },
    Nick {
        target: TargetUser,
        nickname: Option<String>,
    },
    Announce {
        title: String,
        message: String,
        channel: Option<ChannelId>,
    },
}

impl ModerationCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ban { .. } => "ban",
            Self::Kick { .. } => "kick",
            Self::Timeout { .. } => "timeout",
            Self::Untimeout { .. } => "untimeout",
            Self::Mute { .. } => "mute",
            Self::Unmute { .. } => "unmute",
            Self::Deafen { .. } => "deafen",
            Self::Undeafen { .. } => "undeafen",
            Self::Warn { .. } => "warn",
            Self::Clear { .. } => "clear",
            Self::Slowmode { .. } => "slowmode",
            Self::Lock { .. } => "lock",
            Self::Unlock => "unlock",
            Self::Role { .. } => "role",
            Self::Nick { .. } => "nick",
            Self::Announce { .. } => "announce",
        }
    }

    /// Housekeeping commands answer only the moderator; sanctions are announced in channel.
    pub fn replies_privately(&self) -> bool {
        matches!(
            self,
            Self::Clear { .. } | Self::Role { .. } | Self::Nick { .. } | Self::Announce { .. }
        )
    }

    /// Argument checks that need no platform access.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        match self {
            Self::Timeout { duration, .. } => {
                let parsed = parse_duration(duration).ok_or_else(|| {
                    WorkflowError::Validation("Invalid duration format. Use: 10s, 10m, 1h, 1d".to_string())
                })?;
                if parsed.is_zero() || parsed > MAX_TIMEOUT {
                    return Err(WorkflowError::Validation(
                        "Timeouts must be between 1 second and 28 days.".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Clear { amount, .. } if !(1..=100).contains(amount) => Err(WorkflowError::Validation(
                "Amount must be between 1 and 100.".to_string(),
            )),
            Self::Slowmode { seconds } if !(0..=MAX_SLOWMODE_SECONDS).contains(seconds) => Err(
                WorkflowError::Validation(format!("Slowmode must be between 0 and {MAX_SLOWMODE_SECONDS} seconds.")),
            ),
            Self::Nick {
                nickname: Some(nick), ..
            } if nick.chars().count() > 32 => Err(WorkflowError::Validation(
                "Nicknames are limited to 32 characters.".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Where a moderation command was invoked.
#[derive(Debug, Clone)]
pub struct ModerationContext {
    pub actor: Actor,
    pub guild: GuildId,
    pub channel: ChannelId,
}

/// A completed action, before rendering.
struct Applied {
    action: &'static str,
    target: Option<TargetUser>,
    reason: Option<String>,
    duration: Option<String>,
    reply: MessagePayload,
}

pub struct ModerationDesk {
    platform: Arc<dyn PlatformOps>,
    audit: Arc<AuditSink>,
    config: Arc<GuildkeeperConfig>,
}

impl ModerationDesk {
    pub fn new(platform: Arc<dyn PlatformOps>, audit: Arc<AuditSink>, config: Arc<GuildkeeperConfig>) -> Self {
        Self {
            platform,
            audit,
            config,
        }
    }

    /// Owner, administrators and holders of the staff role may moderate.
    pub fn is_staff(&self, actor: &Actor) -> bool {
        self.config.discord.owner_id == Some(actor.id)
            || actor.is_administrator()
            || self.config.roles.staff.is_some_and(|role| actor.has_role(role))
    }

    pub fn authorize(&self, actor: &Actor) -> Result<(), WorkflowError> {
        if self.is_staff(actor) {
            Ok(())
        } else {
            Err(WorkflowError::PermissionDenied(
                "You do not have permission to use this command.".to_string(),
            ))
        }
    }

    /// Runs the command, then records it in the audit log and moderation channel.
    pub async fn execute(
        &self,
        ctx: &ModerationContext,
        command: ModerationCommand,
    ) -> Result<Transition<MessagePayload>, WorkflowError> {
        self.authorize(&ctx.actor)?;
        command.validate()?;

        let name = command.name();
        let applied = self.apply(ctx, command).await?;
        info!(
            command = name,
            moderator = %ctx.actor.id,
            target = ?applied.target.as_ref().map(|t| t.id),
            "Moderation command executed"
        );

        let mut transition = Transition::new(applied.reply.clone());
        let mut details = format!("Action: {}", applied.action);
        if let Some(target) = &applied.target {
            details.push_str(&format!(", Target: {} ({})", target.username, target.id));
        }
        if let Some(reason) = &applied.reason {
            details.push_str(&format!(", Reason: {reason}"));
        }
        if let Some(duration) = &applied.duration {
            details.push_str(&format!(", Duration: {duration}"));
        }
        let entry = NewLogEntry::new(format!("moderation_{name}"), details)
            .by(ctx.actor.id, ctx.actor.username.clone());
        transition
            .attempt(SideEffect::AuditEntry, self.audit.record(entry))
            .await;

        match self.config.channels.moderation_logs.or(self.config.channels.logs) {
            Some(channel) => {
                transition
                    .attempt(SideEffect::LogNotice, self.audit.notify(channel, log_embed(ctx, &applied)))
                    .await;
            }
            None => transition.skip(SideEffect::LogNotice, "moderation log channel not configured"),
        }
        Ok(transition)
    }

    fn reply(&self, title: &str, color: u32, description: String) -> Embed {
        Embed::new()
            .title(title)
            .color(color)
            .description(description)
            .timestamp(Utc::now())
    }

    async fn apply(&self, ctx: &ModerationContext, command: ModerationCommand) -> Result<Applied, WorkflowError> {
        let branding = &self.config.branding;
        let by = &ctx.actor.username;
        let guild = ctx.guild;

        let applied = match command {
            ModerationCommand::Ban {
                target,
                reason,
                delete_messages,
            } => {
                let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
                let delete_seconds = if delete_messages { BAN_DELETE_SECONDS } else { 0 };
                self.platform
                    .ban_member(guild, target.id, delete_seconds, Some(&format!("{reason} | Banned by {by}")))
                    .await
                    .map_err(|e| refusal("ban", e))?;
                let embed = self
                    .reply(
                        "User Banned",
                        branding.danger_color,
                        format!("**{}** has been banned from the server.", target.username),
                    )
                    .field("Reason", reason.clone(), false);
                Applied {
                    action: "Ban",
                    target: Some(target),
                    reason: Some(reason),
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Kick { target, reason } => {
                let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
                self.platform
                    .kick_member(guild, target.id, Some(&format!("{reason} | Kicked by {by}")))
                    .await
                    .map_err(|e| refusal("kick", e))?;
                let embed = self
                    .reply(
                        "User Kicked",
                        branding.warning_color,
                        format!("**{}** has been kicked from the server.", target.username),
                    )
                    .field("Reason", reason.clone(), false);
                Applied {
                    action: "Kick",
                    target: Some(target),
                    reason: Some(reason),
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Timeout {
                target,
                duration,
                reason,
            } => {
                let length = parse_duration(&duration).ok_or_else(|| {
                    WorkflowError::Validation("Invalid duration format. Use: 10s, 10m, 1h, 1d".to_string())
                })?;
                let until = Utc::now()
                    + chrono::Duration::from_std(length)
                        .map_err(|_| WorkflowError::Validation("Timeout is too long.".to_string()))?;
                let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
                self.platform
                    .timeout_member(guild, target.id, Some(until), Some(&format!("{reason} | By {by}")))
                    .await
                    .map_err(|e| refusal("timeout", e))?;
                let readable = format_duration(length);
                let embed = self
                    .reply(
                        "User Timed Out",
                        branding.warning_color,
                        format!("**{}** has been timed out.", target.username),
                    )
                    .field("Duration", readable.clone(), true)
                    .field("Reason", reason.clone(), false);
                Applied {
                    action: "Timeout",
                    target: Some(target),
                    reason: Some(reason),
                    duration: Some(readable),
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Untimeout { target } => {
                self.platform
                    .timeout_member(guild, target.id, None, Some(&format!("Timeout removed by {by}")))
                    .await
                    .map_err(|e| refusal("remove the timeout of", e))?;
                let embed = self.reply(
                    "Timeout Removed",
                    branding.success_color,
                    format!("**{}**'s timeout has been removed.", target.username),
                );
                Applied {
                    action: "Untimeout",
                    target: Some(target),
                    reason: Some("Timeout removed".to_string()),
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Mute { target, reason } => {
                let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
                let audit_reason = format!("{reason} | By {by}");
                self.voice(guild, &target, VoiceStateEdit { mute: Some(true), deaf: None }, Some(&audit_reason)).await?;
                let embed = self
                    .reply(
                        "User Server Muted",
                        branding.warning_color,
                        format!("**{}** has been server muted.", target.username),
                    )
                    .field("Reason", reason.clone(), false);
                Applied {
                    action: "Mute",
                    target: Some(target),
                    reason: Some(reason),
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Unmute { target } => {
                self.voice(guild, &target, VoiceStateEdit { mute: Some(false), deaf: None }, None)
                    .await?;
                let embed = self.reply(
                    "User Unmuted",
                    branding.success_color,
                    format!("**{}** has been unmuted.", target.username),
                );
                Applied {
                    action: "Unmute",
                    target: Some(target),
                    reason: None,
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Deafen { target, reason } => {
                let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
                let audit_reason = format!("{reason} | By {by}");
                self.voice(guild, &target, VoiceStateEdit { mute: None, deaf: Some(true) }, Some(&audit_reason)).await?;
                let embed = self
                    .reply(
                        "User Server Deafened",
                        branding.warning_color,
                        format!("**{}** has been server deafened.", target.username),
                    )
                    .field("Reason", reason.clone(), false);
                Applied {
                    action: "Deafen",
                    target: Some(target),
                    reason: Some(reason),
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Undeafen { target } => {
                self.voice(guild, &target, VoiceStateEdit { mute: None, deaf: Some(false) }, None)
                    .await?;
                let embed = self.reply(
                    "User Undeafened",
                    branding.success_color,
                    format!("**{}** has been undeafened.", target.username),
                );
                Applied {
                    action: "Undeafen",
                    target: Some(target),
                    reason: None,
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Warn { target, reason } => {
                let notice = self
                    .reply(
                        "Warning Received",
                        branding.warning_color,
                        format!("You have received a warning in the server from **{by}**."),
                    )
                    .field("Reason", reason.clone(), false);
                let delivered = self
                    .platform
                    .send_direct_message(target.id, &MessagePayload::embeds(branded(branding, notice)))
                    .await
                    .is_ok();
                let mut embed = self
                    .reply(
                        "User Warned",
                        branding.warning_color,
                        format!("**{}** has been warned.", target.username),
                    )
                    .field("Reason", reason.clone(), false);
                if !delivered {
                    embed = embed.field("Note", "The user could not be messaged directly.", false);
                }
                Applied {
                    action: "Warn",
                    target: Some(target),
                    reason: Some(reason),
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Clear { amount, author } => {
                let deleted = self.clear(ctx.channel, amount, author.as_ref()).await?;
                let from = author
                    .as_ref()
                    .map(|a| format!(" from {}", a.username))
                    .unwrap_or_default();
                Applied {
                    action: "Clear Messages",
                    target: author,
                    reason: Some(format!("Cleared {deleted} messages")),
                    duration: None,
                    reply: MessagePayload::text(format!("Deleted **{deleted}** message(s){from}.")),
                }
            }
            ModerationCommand::Slowmode { seconds } => {
                let seconds = seconds as u32;
                self.platform
                    .set_slowmode(ctx.channel, seconds)
                    .await
                    .map_err(|e| refusal("set slowmode in", e))?;
                let text = if seconds == 0 {
                    "Slowmode has been disabled.".to_string()
                } else {
                    format!(
                        "Slowmode set to {}.",
                        format_duration(Duration::from_secs(u64::from(seconds)))
                    )
                };
                Applied {
                    action: "Slowmode",
                    target: None,
                    reason: Some(format!("{seconds}s in {}", ctx.channel.mention())),
                    duration: None,
                    reply: MessagePayload::embeds(vec![self.reply("Slowmode Updated", branding.color, text)]),
                }
            }
            ModerationCommand::Lock { reason } => {
                let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
                let overwrite =
                    PermissionOverwrite::role(guild.everyone_role(), Permissions::empty(), Permissions::SEND_MESSAGES);
                self.platform
                    .edit_permission_overwrite(ctx.channel, &overwrite, Some(&format!("{reason} | Locked by {by}")))
                    .await
                    .map_err(|e| refusal("lock", e))?;
                let embed = self
                    .reply("🔒 Channel Locked", branding.danger_color, "This channel has been locked.".to_string())
                    .field("Reason", reason.clone(), false);
                Applied {
                    action: "Lock",
                    target: None,
                    reason: Some(reason),
                    duration: None,
                    reply: MessagePayload::embeds(vec![embed]),
                }
            }
            ModerationCommand::Unlock => {
                let overwrite =
                    PermissionOverwrite::role(guild.everyone_role(), Permissions::empty(), Permissions::empty());
                self.platform
                    .edit_permission_overwrite(ctx.channel, &overwrite, Some(&format!("Unlocked by {by}")))
                    .await
                    .map_err(|e| refusal("unlock", e))?;
                Applied {
                    action: "Unlock",
                    target: None,
                    reason: None,
                    duration: None,
                    reply: MessagePayload::embeds(vec![self.reply(
                        "🔓 Channel Unlocked",
                        branding.success_color,
                        "This channel has been unlocked.".to_string(),
                    )]),
                }
            }
            ModerationCommand::Role { action, target, role } => {
                let audit_reason = format!("By {by}");
                let (verb, result) = match action {
                    RoleAction::Add => (
                        "Added",
                        self.platform.add_role(guild, target.id, role, Some(&audit_reason)).await,
                    ),
                    RoleAction::Remove => (
                        "Removed",
                        self.platform.remove_role(guild, target.id, role, Some(&audit_reason)).await,
                    ),
                };
                result.map_err(|e| refusal("change the roles of", e))?;
                let preposition = if action == RoleAction::Add { "to" } else { "from" };
                Applied {
                    action: if action == RoleAction::Add { "Role Add" } else { "Role Remove" },
                    target: Some(target.clone()),
                    reason: Some(format!("{verb} {}", role.mention())),
                    duration: None,
                    reply: MessagePayload::text(format!(
                        "{verb} {} {preposition} **{}**.",
                        role.mention(),
                        target.username
                    )),
                }
            }
            ModerationCommand::Nick { target, nickname } => {
                self.platform
                    .set_nickname(guild, target.id, nickname.as_deref())
                    .await
                    .map_err(|e| refusal("change the nickname of", e))?;
                let text = match &nickname {
                    Some(nick) => format!("Changed **{}**'s nickname to **{nick}**.", target.username),
                    None => format!("Reset **{}**'s nickname.", target.username),
                };
                Applied {
                    action: "Nickname",
                    target: Some(target),
                    reason: nickname.map(|nick| format!("New nickname: {nick}")),
                    duration: None,
                    reply: MessagePayload::text(text),
                }
            }
            ModerationCommand::Announce {
                title,
                message,
                channel,
            } => {
                let destination = channel.unwrap_or(ctx.channel);
                let embed = Embed::new().title(title.clone()).description(message);
                self.platform
                    .send_message(destination, &MessagePayload::embeds(branded(branding, embed)))
                    .await
                    .map_err(|e| WorkflowError::external("send the announcement", e))?;
                Applied {
                    action: "Announce",
                    target: None,
                    reason: Some(format!("{title} in {}", destination.mention())),
                    duration: None,
                    reply: MessagePayload::text(format!("Announcement sent to {}.", destination.mention())),
                }
            }
        };
        Ok(applied)
    }

    async fn voice(
        &self,
        guild: GuildId,
        target: &TargetUser,
        edit: VoiceStateEdit,
        reason: Option<&str>,
    ) -> Result<(), WorkflowError> {
        match self.platform.set_voice_state(guild, target.id, edit, reason).await {
            Ok(()) => Ok(()),
            Err(PlatformError::Api {
                code: Some(NOT_IN_VOICE),
                ..
            }) => Err(WorkflowError::Validation("User is not in a voice channel.".to_string())),
            Err(e) => Err(refusal("update the voice state of", e)),
        }
    }

    /// Deletes up to `amount` recent unpinned messages, optionally from one author.
    async fn clear(
        &self,
        channel: ChannelId,
        amount: i64,
        author: Option<&TargetUser>,
    ) -> Result<usize, WorkflowError> {
        let recent = self
            .platform
            .fetch_recent_messages(channel, 100)
            .await
            .map_err(|e| WorkflowError::external("fetch messages", e))?;
        let cutoff = Utc::now() - BULK_DELETE_MAX_AGE;
        let selected: Vec<MessageId> = recent
            .iter()
            .filter(|m| author.map_or(true, |a| m.author.id == a.id))
            .filter(|m| !m.pinned && m.timestamp > cutoff)
            .take(amount as usize)
            .map(|m| m.id)
            .collect();
        self.platform
            .delete_messages(channel, &selected)
            .await
            .map_err(|e| WorkflowError::external("clear messages", e))
    }
}

/// Maps a refused sanction to a readable error.
fn refusal(verb: &str, error: PlatformError) -> WorkflowError {
    match error {
        PlatformError::Forbidden { .. } => {
            WorkflowError::PermissionDenied(format!("I cannot {verb} this user."))
        }
        PlatformError::NotFound { .. } => WorkflowError::NotFound("That user is not in this server.".to_string()),
        other => WorkflowError::external(format!("{verb} the user"), other),
    }
}

fn log_embed(ctx: &ModerationContext, applied: &Applied) -> Embed {
    let mut embed = Embed::new()
        .title(format!("Moderation Action: {}", applied.action))
        .description(format!(
            "**Moderator:** {} ({})",
            ctx.actor.id.mention(),
            ctx.actor.username
        ));
    if let Some(target) = &applied.target {
        embed = embed
            .field("Target", format!("{} ({})", target.id.mention(), target.username), true)
            .footer(format!("Target ID: {}", target.id));
    }
    embed = embed.field("Action", applied.action, true);
    if let Some(reason) = &applied.reason {
        embed = embed.field("Reason", reason.clone(), false);
    }
    if let Some(duration) = &applied.duration {
        embed = embed.field("Duration", duration.clone(), true);
    }
    embed
}
