pub mod lifecycle;
pub mod transcript;

use chrono::{DateTime, Utc};
use statig::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

use self::lifecycle::{TicketEvent, TicketLifecycle};
use super::{Actor, KeyedLocks, SideEffect, Transition, WorkflowError};
use crate::audit::AuditSink;
use crate::config::GuildkeeperConfig;
use crate::discord::embeds::branded;
use crate::discord::types::*;
use crate::discord::{PlatformError, PlatformOps};
use crate::gateway::custom_id::CustomId;
use crate::observability::OperationTimer;
use crate::storage::NewLogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketType {
    General,
    StaffReport,
    HighRank,
}

impl TicketType {
    pub const ALL: [TicketType; 3] = [Self::General, Self::StaffReport, Self::HighRank];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::StaffReport => "staff_report",
            Self::HighRank => "high_rank",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::General => "General Support",
            Self::StaffReport => "Staff Report",
            Self::HighRank => "High Rank Support",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::General => "General questions and help with the server",
            Self::StaffReport => "Report a staff member for misconduct",
            Self::HighRank => "Sensitive matters for senior staff only",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| WorkflowError::Validation(format!("Unknown ticket type '{s}'.")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub channel: ChannelId,
    pub name: String,
    pub owner: UserId,
    pub owner_name: String,
    pub kind: TicketType,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketCreation {
    Created(Ticket),
    /// The member already has an open ticket of this type; nothing was created.
    AlreadyOpen(Ticket),
}

impl TicketCreation {
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::Created(ticket) | Self::AlreadyOpen(ticket) => ticket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTicket {
    pub channel: ChannelId,
    /// `None` when the channel was not opened through the desk.
    pub ticket: Option<Ticket>,
    pub transcript: String,
    pub message_count: usize,
}

impl ClosedTicket {
    pub fn kind_label(&self) -> &'static str {
        self.ticket.as_ref().map_or("unknown", |ticket| ticket.kind.as_str())
    }
}

struct Tracked {
    ticket: Option<Ticket>,
    lifecycle: StateMachine<TicketLifecycle>,
}

impl Tracked {
    fn new(channel: ChannelId, ticket: Option<Ticket>) -> Self {
        Self {
            ticket,
            lifecycle: TicketLifecycle::new(channel).state_machine(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<ChannelId, Tracked>>>;

const MEMBER_ACCESS: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::SEND_MESSAGES)
    .union(Permissions::READ_MESSAGE_HISTORY)
    .union(Permissions::ATTACH_FILES);
const STAFF_ACCESS: Permissions = MEMBER_ACCESS.union(Permissions::MANAGE_MESSAGES);

/// Support ticket desk: private channels per (member, type) with transcripted closing.
pub struct TicketDesk {
    platform: Arc<dyn PlatformOps>,
    audit: Arc<AuditSink>,
    config: Arc<GuildkeeperConfig>,
    tickets: Registry,
    creation_locks: KeyedLocks<(UserId, TicketType)>,
}

impl TicketDesk {
    pub fn new(platform: Arc<dyn PlatformOps>, audit: Arc<AuditSink>, config: Arc<GuildkeeperConfig>) -> Self {
        Self {
            platform,
            audit,
            config,
            tickets: Arc::new(Mutex::new(HashMap::new())),
            creation_locks: KeyedLocks::new(),
        }
    }

    pub fn authorize_panel(&self, actor: &Actor) -> Result<(), WorkflowError> {
        if actor.is_administrator() {
            Ok(())
        } else {
            Err(WorkflowError::PermissionDenied(
                "Only administrators can deploy the ticket panel.".to_string(),
            ))
        }
    }

    /// Posts the public panel with the create control.
    pub async fn open_panel(&self, channel: ChannelId) -> Result<MessageId, WorkflowError> {
        let types = TicketType::ALL
            .iter()
            .map(|kind| format!("**{}**\n{}", kind.label(), kind.description()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let embed = Embed::new().title("🎫 Support Tickets").description(format!(
            "Need help? Press the button below and pick the kind of ticket you need.\n\n{types}"
        ));
        let payload = MessagePayload::embeds(branded(&self.config.branding, embed)).with_components(vec![
            ActionRow::new(vec![Component::button(
                ButtonStyle::Primary,
                "📩 Create Ticket",
                CustomId::OpenTicket.to_string(),
            )]),
        ]);
        let message = self
            .platform
            .send_message(channel, &payload)
            .await
            .map_err(|e| WorkflowError::external("post the ticket panel", e))?;
        info!(channel = %channel, "Ticket panel deployed");
        Ok(message)
    }

    /// Private type chooser shown after pressing the create control.
    pub fn type_menu(&self) -> MessagePayload {
        let options = TicketType::ALL
            .into_iter()
            .map(|kind| SelectOption {
                label: kind.label().to_string(),
                value: kind.as_str().to_string(),
                description: Some(kind.description().to_string()),
            })
            .collect();
        MessagePayload::text("Select the type of ticket you would like to open:")
            .with_components(vec![ActionRow::new(vec![Component::select_menu(
                CustomId::TicketTypeMenu.to_string(),
                "Choose a ticket type",
                options,
            )])])
            .ephemeral()
    }

    pub async fn open_ticket_for(&self, owner: UserId, kind: TicketType) -> Option<Ticket> {
        let tickets = self.tickets.lock().await;
        tickets
            .values()
            .filter(|tracked| lifecycle::is_open(tracked.lifecycle.state()))
            .filter_map(|tracked| tracked.ticket.as_ref())
            .find(|ticket| ticket.owner == owner && ticket.kind == kind)
            .cloned()
    }

    pub async fn tracked_ticket(&self, channel: ChannelId) -> Option<Ticket> {
        let tickets = self.tickets.lock().await;
        tickets.get(&channel).and_then(|tracked| tracked.ticket.clone())
    }

    /// Opens a private channel for `(owner, kind)` unless one is already open.
    pub async fn create_ticket(
        &self,
        guild: GuildId,
        owner: &Actor,
        kind: TicketType,
    ) -> Result<Transition<TicketCreation>, WorkflowError> {
        let _guard = self.creation_locks.lock((owner.id, kind)).await;

        if let Some(existing) = self.open_ticket_for(owner.id, kind).await {
            info!(owner = %owner.id, kind = %kind, channel = %existing.channel, "Ticket already open");
            return Ok(Transition::new(TicketCreation::AlreadyOpen(existing)));
        }

        let category = self.config.tickets.category.ok_or_else(|| {
            WorkflowError::NotFound("Ticket category not found. Please contact an administrator.".to_string())
        })?;

        let opened_at = Utc::now();
        let name = channel_name(kind, &owner.username, opened_at);
        let mut request = NewChannel::text(name.clone());
        request.parent_id = Some(category);
        request.topic = Some(format!("{} ticket for {} ({})", kind.label(), owner.username, owner.id));
        request.permission_overwrites = self.overwrites(guild, owner.id, kind);

        let channel = self
            .platform
            .create_channel(guild, &request)
            .await
            .map_err(|e| WorkflowError::external("create your ticket", e))?;

        let ticket = Ticket {
            channel,
            name: name.clone(),
            owner: owner.id,
            owner_name: owner.username.clone(),
            kind,
            opened_at,
        };
        self.tickets
            .lock()
            .await
            .insert(channel, Tracked::new(channel, Some(ticket.clone())));
        info!(owner = %owner.id, kind = %kind, channel = %channel, "Ticket created");

        let mut transition = Transition::new(TicketCreation::Created(ticket.clone()));
        transition
            .attempt(
                SideEffect::WelcomeMessage,
                self.platform.send_message(channel, &self.welcome_message(&ticket)),
            )
            .await;
        let entry = NewLogEntry::new("ticket_created", format!("Ticket: {name}, Type: {}", kind.label()))
            .by(owner.id, owner.username.clone());
        transition
            .attempt(SideEffect::AuditEntry, self.audit.record(entry))
            .await;
        Ok(transition)
    }

    fn overwrites(&self, guild: GuildId, owner: UserId, kind: TicketType) -> Vec<PermissionOverwrite> {
        let mut overwrites = vec![
            PermissionOverwrite::role(guild.everyone_role(), Permissions::empty(), Permissions::VIEW_CHANNEL),
            PermissionOverwrite::member(owner, MEMBER_ACCESS, Permissions::empty()),
        ];
        if let Some(support) = self.config.roles.ticket_support {
            overwrites.push(PermissionOverwrite::role(support, STAFF_ACCESS, Permissions::empty()));
        }
        if kind == TicketType::HighRank {
            if let Some(high_rank) = self.config.roles.ticket_high_rank {
                overwrites.push(PermissionOverwrite::role(high_rank, STAFF_ACCESS, Permissions::empty()));
            }
        }
        overwrites
    }

    fn welcome_message(&self, ticket: &Ticket) -> MessagePayload {
        let roles = &self.config.roles;
        let staff_ping = match ticket.kind {
            TicketType::HighRank => roles.ticket_high_rank.or(roles.ticket_support),
            _ => roles.ticket_support,
        };
        let content = match staff_ping {
            Some(role) => format!("{} {}", ticket.owner.mention(), role.mention()),
            None => ticket.owner.mention(),
        };
        let embed = Embed::new()
            .title(format!("🎫 {}", ticket.kind.label()))
            .description(format!(
                "Thank you for opening a ticket, {}! A member of the team will be with you shortly.\n\n\
                 Please describe your issue in as much detail as possible.",
                ticket.owner.mention()
            ))
            .field("Ticket Type", ticket.kind.label(), true)
            .field("Opened By", ticket.owner.mention(), true);
        MessagePayload::embeds(branded(&self.config.branding, embed))
            .with_content(content)
            .with_components(vec![ActionRow::new(vec![Component::button(
                ButtonStyle::Danger,
                "🔒 Close Ticket",
                CustomId::CloseTicket.to_string(),
            )])])
    }

    /// Private confirmation prompt; nothing changes until it is confirmed.
    pub fn request_close(&self) -> MessagePayload {
        MessagePayload::text("Are you sure you want to close this ticket?")
            .with_components(vec![ActionRow::new(vec![
                Component::button(ButtonStyle::Danger, "Confirm Close", CustomId::ConfirmClose.to_string()),
                Component::button(ButtonStyle::Secondary, "Cancel", CustomId::CancelClose.to_string()),
            ])])
            .ephemeral()
    }

    pub fn cancel_close(&self) -> MessagePayload {
        MessagePayload::text("Ticket close cancelled.").clear_components()
    }

    /// Captures the transcript, logs the close and schedules the channel for deletion.
    pub async fn confirm_close(
        &self,
        channel: ChannelId,
        closer: &Actor,
    ) -> Result<Transition<ClosedTicket>, WorkflowError> {
        let timer = OperationTimer::new("ticket_close");
        let ticket = self.begin_close(channel).await?;

        let messages = match self
            .platform
            .fetch_recent_messages(channel, self.config.tickets.transcript_limit)
            .await
        {
            Ok(messages) => messages,
            Err(error) => {
                self.abort_close(channel).await;
                return Err(match error {
                    PlatformError::NotFound { .. } => {
                        WorkflowError::NotFound("This ticket channel no longer exists.".to_string())
                    }
                    other => WorkflowError::external("close the ticket", other),
                });
            }
        };

        let closed = ClosedTicket {
            channel,
            ticket,
            transcript: transcript::render(&messages),
            message_count: messages.len(),
        };
        let mut transition = Transition::new(closed.clone());

        let delay = self.config.tickets.close_delay_seconds;
        let notice = Embed::new()
            .title("🔒 Ticket Closing")
            .description(format!(
                "This ticket was closed by {} and will be deleted in {delay} seconds.",
                closer.id.mention()
            ));
        transition
            .attempt(
                SideEffect::ClosingNotice,
                self.platform
                    .send_message(channel, &MessagePayload::embeds(branded(&self.config.branding, notice))),
            )
            .await;

        let owner = closed
            .ticket
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |t| format!("{} ({})", t.owner_name, t.owner));
        let entry = NewLogEntry::new(
            "ticket_closed",
            format!(
                "Channel: {channel}, Type: {}, Owner: {owner}, Messages: {}\n\n{}",
                closed.kind_label(),
                closed.message_count,
                closed.transcript
            ),
        )
        .by(closer.id, closer.username.clone());
        transition
            .attempt(SideEffect::AuditEntry, self.audit.record(entry))
            .await;

        match self.config.channels.ticket_logs {
            Some(log_channel) => {
                let name = closed
                    .ticket
                    .as_ref()
                    .map_or_else(|| channel.to_string(), |t| t.name.clone());
                let embed = Embed::new()
                    .title("📁 Ticket Closed")
                    .field("Ticket", name.clone(), true)
                    .field("Type", closed.kind_label(), true)
                    .field("Closed By", closer.id.mention(), true)
                    .field("Owner", owner, true)
                    .field("Messages", closed.message_count.to_string(), true);
                transition
                    .attempt(SideEffect::LogNotice, self.audit.notify(log_channel, embed))
                    .await;
                let file = FileUpload {
                    filename: format!("transcript-{name}.txt"),
                    bytes: closed.transcript.clone().into_bytes(),
                };
                transition
                    .attempt(
                        SideEffect::TranscriptUpload,
                        self.audit.attach(log_channel, &format!("Transcript for **{name}**"), &file),
                    )
                    .await;
            }
            None => {
                transition.skip(SideEffect::LogNotice, "ticket log channel not configured");
                transition.skip(SideEffect::TranscriptUpload, "ticket log channel not configured");
            }
        }

        self.schedule_deletion(channel, Duration::from_secs(delay));
        transition.applied(SideEffect::ChannelDeletion);
        timer.finish();
        Ok(transition)
    }

    /// Moves the channel's lifecycle from open to closing; only one caller can win.
    async fn begin_close(&self, channel: ChannelId) -> Result<Option<Ticket>, WorkflowError> {
        let mut tickets = self.tickets.lock().await;
        let tracked = tickets
            .entry(channel)
            .or_insert_with(|| Tracked::new(channel, None));
        if !lifecycle::is_open(tracked.lifecycle.state()) {
            return Err(WorkflowError::NotFound(
                "This ticket is already being closed.".to_string(),
            ));
        }
        tracked.lifecycle.handle(&TicketEvent::ConfirmClose);
        Ok(tracked.ticket.clone())
    }

    async fn abort_close(&self, channel: ChannelId) {
        let mut tickets = self.tickets.lock().await;
        if let Some(tracked) = tickets.get_mut(&channel) {
            if tracked.ticket.is_none() {
                tickets.remove(&channel);
            } else {
                tracked.lifecycle.handle(&TicketEvent::CloseAborted);
            }
        }
    }

    fn schedule_deletion(&self, channel: ChannelId, delay: Duration) {
        let platform = self.platform.clone();
        let tickets = self.tickets.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match platform.delete_channel(channel).await {
                Ok(()) => info!(channel = %channel, "Ticket channel deleted"),
                Err(e) => error!(channel = %channel, error = %e, "Failed to delete ticket channel"),
            }
            if let Some(mut tracked) = tickets.lock().await.remove(&channel) {
                tracked.lifecycle.handle(&TicketEvent::ChannelDeleted);
            }
        });
    }
}

/// `{type}-{username}-{6 digits}`, lowercased and limited to channel-safe characters.
pub fn channel_name(kind: TicketType, username: &str, at: DateTime<Utc>) -> String {
    let user: String = username
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(32)
        .collect();
    let user = if user.is_empty() { "member".to_string() } else { user };
    let suffix = at.timestamp_millis().rem_euclid(1_000_000);
    format!("{}-{user}-{suffix:06}", kind.as_str().replace('_', "-"))
}
