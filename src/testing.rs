//! Recording platform fake and fixtures shared by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audit::AuditSink;
use crate::config::GuildkeeperConfig;
use crate::discord::types::*;
use crate::discord::{PlatformError, PlatformOps};
use crate::storage::memory::InMemoryStore;
use crate::storage::Store;
use crate::workflows::Actor;

/// Every call the workflows made, in order.
#[derive(Debug, Clone)]
pub enum PlatformCall {
    SendMessage { channel: ChannelId, message: MessagePayload },
    EditMessage { channel: ChannelId, message: MessageId, payload: MessagePayload },
    SendFile { channel: ChannelId, content: String, filename: String, bytes: Vec<u8> },
    DirectMessage { user: UserId, message: MessagePayload },
    CreateChannel { guild: GuildId, channel: NewChannel },
    DeleteChannel { channel: ChannelId },
    FetchMessages { channel: ChannelId, limit: u8 },
    DeleteMessages { channel: ChannelId, messages: Vec<MessageId> },
    EditOverwrite { channel: ChannelId, overwrite: PermissionOverwrite },
    Slowmode { channel: ChannelId, seconds: u32 },
    FetchMember { user: UserId },
    FetchUser { user: UserId },
    FetchGuild { guild: GuildId },
    CountChannels { guild: GuildId },
    AddRole { user: UserId, role: RoleId },
    RemoveRole { user: UserId, role: RoleId },
    SetNickname { user: UserId, nickname: Option<String> },
    VoiceState { user: UserId, edit: VoiceStateEdit },
    Ban { user: UserId, delete_message_seconds: u32, reason: Option<String> },
    Kick { user: UserId, reason: Option<String> },
    Timeout { user: UserId, until: Option<DateTime<Utc>> },
    EditOriginal { token: String, message: MessagePayload },
    RegisterCommands { guild: GuildId, names: Vec<String> },
}

/// Failure injected for a named operation.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    NotFound,
    Forbidden,
    Api { status: u16, code: Option<u64> },
}

impl Failure {
    fn into_error(self, operation: &str) -> PlatformError {
        let operation = operation.to_string();
        match self {
            Self::NotFound => PlatformError::NotFound { operation },
            Self::Forbidden => PlatformError::Forbidden { operation },
            Self::Api { status, code } => PlatformError::Api {
                operation,
                status,
                code,
                message: "injected failure".to_string(),
            },
        }
    }
}

#[derive(Default)]
pub struct FakePlatform {
    calls: Mutex<Vec<PlatformCall>>,
    failures: Mutex<HashMap<&'static str, Failure>>,
    members: Mutex<HashMap<UserId, Member>>,
    guild: Mutex<Option<(Guild, usize)>>,
    history: Mutex<HashMap<ChannelId, Vec<ChannelMessage>>>,
    next_id: AtomicU64,
    channel_delay: Mutex<Option<Duration>>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1000),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    pub fn fail(&self, operation: &'static str, failure: Failure) {
        self.failures.lock().unwrap().insert(operation, failure);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failures.lock().unwrap().remove(operation);
    }

    pub fn add_member(&self, user: UserId, username: &str, roles: Vec<RoleId>) {
        self.members.lock().unwrap().insert(
            user,
            Member {
                user: Some(User {
                    id: user,
                    username: username.to_string(),
                    global_name: None,
                    avatar: None,
                    bot: false,
                }),
                nick: None,
                roles,
                permissions: None,
                joined_at: None,
            },
        );
    }

    /// Attaches profile details to a member added with `add_member`.
    pub fn set_member_profile(&self, user: UserId, avatar: Option<&str>, nick: Option<&str>, joined_at: DateTime<Utc>) {
        if let Some(member) = self.members.lock().unwrap().get_mut(&user) {
            member.nick = nick.map(str::to_string);
            member.joined_at = Some(joined_at);
            if let Some(user) = member.user.as_mut() {
                user.avatar = avatar.map(str::to_string);
            }
        }
    }

    /// Guild returned by `fetch_guild`, with the channel count reported alongside it.
    pub fn set_guild(&self, guild: Guild, channels: usize) {
        *self.guild.lock().unwrap() = Some((guild, channels));
    }

    pub fn member_roles(&self, user: UserId) -> Vec<RoleId> {
        self.members
            .lock()
            .unwrap()
            .get(&user)
            .map(|m| m.roles.clone())
            .unwrap_or_default()
    }

    /// Newest-first history returned by `fetch_recent_messages`.
    pub fn set_history(&self, channel: ChannelId, messages: Vec<ChannelMessage>) {
        self.history.lock().unwrap().insert(channel, messages);
    }

    /// Makes `create_channel` yield for a while, widening race windows.
    pub fn slow_channel_creation(&self, delay: Duration) {
        *self.channel_delay.lock().unwrap() = Some(delay);
    }

    fn record(&self, operation: &'static str, call: PlatformCall) -> Result<(), PlatformError> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(operation) {
            Some(failure) => Err(failure.into_error(operation)),
            None => Ok(()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformOps for FakePlatform {
    async fn send_message(&self, channel: ChannelId, message: &MessagePayload) -> Result<MessageId, PlatformError> {
        self.record(
            "send_message",
            PlatformCall::SendMessage {
                channel,
                message: message.clone(),
            },
        )?;
        Ok(MessageId(self.next_id()))
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        payload: &MessagePayload,
    ) -> Result<(), PlatformError> {
        self.record(
            "edit_message",
            PlatformCall::EditMessage {
                channel,
                message,
                payload: payload.clone(),
            },
        )
    }

    async fn send_file(
        &self,
        channel: ChannelId,
        content: &str,
        file: &FileUpload,
    ) -> Result<MessageId, PlatformError> {
        self.record(
            "send_file",
            PlatformCall::SendFile {
                channel,
                content: content.to_string(),
                filename: file.filename.clone(),
                bytes: file.bytes.clone(),
            },
        )?;
        Ok(MessageId(self.next_id()))
    }

    async fn send_direct_message(&self, user: UserId, message: &MessagePayload) -> Result<MessageId, PlatformError> {
        self.record(
            "send_direct_message",
            PlatformCall::DirectMessage {
                user,
                message: message.clone(),
            },
        )?;
        Ok(MessageId(self.next_id()))
    }

    async fn create_channel(&self, guild: GuildId, channel: &NewChannel) -> Result<ChannelId, PlatformError> {
        let delay = *self.channel_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(
            "create_channel",
            PlatformCall::CreateChannel {
                guild,
                channel: channel.clone(),
            },
        )?;
        Ok(ChannelId(self.next_id()))
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError> {
        self.record("delete_channel", PlatformCall::DeleteChannel { channel })
    }

    async fn fetch_recent_messages(&self, channel: ChannelId, limit: u8) -> Result<Vec<ChannelMessage>, PlatformError> {
        self.record("fetch_recent_messages", PlatformCall::FetchMessages { channel, limit })?;
        let history = self.history.lock().unwrap();
        Ok(history
            .get(&channel)
            .map(|messages| messages.iter().take(usize::from(limit)).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_messages(&self, channel: ChannelId, messages: &[MessageId]) -> Result<usize, PlatformError> {
        self.record(
            "delete_messages",
            PlatformCall::DeleteMessages {
                channel,
                messages: messages.to_vec(),
            },
        )?;
        Ok(messages.len())
    }

    async fn edit_permission_overwrite(
        &self,
        channel: ChannelId,
        overwrite: &PermissionOverwrite,
        _reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(
            "edit_permission_overwrite",
            PlatformCall::EditOverwrite {
                channel,
                overwrite: overwrite.clone(),
            },
        )
    }

    async fn set_slowmode(&self, channel: ChannelId, seconds: u32) -> Result<(), PlatformError> {
        self.record("set_slowmode", PlatformCall::Slowmode { channel, seconds })
    }

    async fn fetch_member(&self, _guild: GuildId, user: UserId) -> Result<Member, PlatformError> {
        self.record("fetch_member", PlatformCall::FetchMember { user })?;
        self.members
            .lock()
            .unwrap()
            .get(&user)
            .cloned()
            .ok_or_else(|| Failure::NotFound.into_error("fetch_member"))
    }

    async fn fetch_user(&self, user: UserId) -> Result<User, PlatformError> {
        self.record("fetch_user", PlatformCall::FetchUser { user })?;
        self.members
            .lock()
            .unwrap()
            .get(&user)
            .and_then(|m| m.user.clone())
            .ok_or_else(|| Failure::NotFound.into_error("fetch_user"))
    }

    async fn fetch_guild(&self, guild: GuildId) -> Result<Guild, PlatformError> {
        self.record("fetch_guild", PlatformCall::FetchGuild { guild })?;
        self.guild
            .lock()
            .unwrap()
            .as_ref()
            .map(|(guild, _)| guild.clone())
            .ok_or_else(|| Failure::NotFound.into_error("fetch_guild"))
    }

    async fn count_guild_channels(&self, guild: GuildId) -> Result<usize, PlatformError> {
        self.record("count_guild_channels", PlatformCall::CountChannels { guild })?;
        Ok(self.guild.lock().unwrap().as_ref().map_or(0, |(_, channels)| *channels))
    }

    async fn add_role(
        &self,
        _guild: GuildId,
        user: UserId,
        role: RoleId,
        _reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record("add_role", PlatformCall::AddRole { user, role })?;
        if let Some(member) = self.members.lock().unwrap().get_mut(&user) {
            if !member.roles.contains(&role) {
                member.roles.push(role);
            }
        }
        Ok(())
    }

    async fn remove_role(
        &self,
        _guild: GuildId,
        user: UserId,
        role: RoleId,
        _reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record("remove_role", PlatformCall::RemoveRole { user, role })?;
        if let Some(member) = self.members.lock().unwrap().get_mut(&user) {
            member.roles.retain(|r| *r != role);
        }
        Ok(())
    }

    async fn set_nickname(&self, _guild: GuildId, user: UserId, nickname: Option<&str>) -> Result<(), PlatformError> {
        self.record(
            "set_nickname",
            PlatformCall::SetNickname {
                user,
                nickname: nickname.map(str::to_string),
            },
        )
    }

    async fn set_voice_state(
        &self,
        _guild: GuildId,
        user: UserId,
        edit: VoiceStateEdit,
        _reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record("set_voice_state", PlatformCall::VoiceState { user, edit })
    }

    async fn ban_member(
        &self,
        _guild: GuildId,
        user: UserId,
        delete_message_seconds: u32,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(
            "ban_member",
            PlatformCall::Ban {
                user,
                delete_message_seconds,
                reason: reason.map(str::to_string),
            },
        )
    }

    async fn kick_member(&self, _guild: GuildId, user: UserId, reason: Option<&str>) -> Result<(), PlatformError> {
        self.record(
            "kick_member",
            PlatformCall::Kick {
                user,
                reason: reason.map(str::to_string),
            },
        )
    }

    async fn timeout_member(
        &self,
        _guild: GuildId,
        user: UserId,
        until: Option<DateTime<Utc>>,
        _reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record("timeout_member", PlatformCall::Timeout { user, until })
    }

    async fn edit_original_response(&self, token: &str, message: &MessagePayload) -> Result<(), PlatformError> {
        self.record(
            "edit_original_response",
            PlatformCall::EditOriginal {
                token: token.to_string(),
                message: message.clone(),
            },
        )
    }

    async fn register_guild_commands(&self, guild: GuildId, commands: &[CommandSpec]) -> Result<(), PlatformError> {
        self.record(
            "register_guild_commands",
            PlatformCall::RegisterCommands {
                guild,
                names: commands.iter().map(|c| c.name.clone()).collect(),
            },
        )
    }
}

pub const GUILD: GuildId = GuildId(1);
pub const STAFF_ROLE: RoleId = RoleId(50);
pub const REVIEWER_ROLE: RoleId = RoleId(51);
pub const STAFF_APPLICATION_ROLE: RoleId = RoleId(60);
pub const VERIFIED_ROLE: RoleId = RoleId(70);
pub const APPLICATIONS_CHANNEL: ChannelId = ChannelId(200);
pub const RESULTS_CHANNEL: ChannelId = ChannelId(201);
pub const LOGS_CHANNEL: ChannelId = ChannelId(202);
pub const TICKET_LOGS_CHANNEL: ChannelId = ChannelId(203);
pub const VERIFICATION_LOGS_CHANNEL: ChannelId = ChannelId(204);
pub const TICKET_CATEGORY: ChannelId = ChannelId(300);

/// Configuration with every channel and role routed to a known id.
pub fn test_config() -> GuildkeeperConfig {
    let mut config = GuildkeeperConfig::default();
    config.discord.guild_id = Some(GUILD);
    config.channels.applications = Some(APPLICATIONS_CHANNEL);
    config.channels.application_results = Some(RESULTS_CHANNEL);
    config.channels.logs = Some(LOGS_CHANNEL);
    config.channels.ticket_logs = Some(TICKET_LOGS_CHANNEL);
    config.channels.verification_logs = Some(VERIFICATION_LOGS_CHANNEL);
    config.roles.staff = Some(STAFF_ROLE);
    config.roles.reviewer = Some(REVIEWER_ROLE);
    config.roles.staff_application = Some(STAFF_APPLICATION_ROLE);
    config.roles.ticket_support = Some(STAFF_ROLE);
    config.roles.verified = Some(VERIFIED_ROLE);
    config.tickets.category = Some(TICKET_CATEGORY);
    config
}

/// Store, fake platform and audit sink wired together.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub platform: Arc<FakePlatform>,
    pub audit: Arc<AuditSink>,
    pub config: Arc<GuildkeeperConfig>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GuildkeeperConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let platform = FakePlatform::new();
        let audit = Arc::new(AuditSink::new(
            store.clone() as Arc<dyn Store>,
            platform.clone() as Arc<dyn PlatformOps>,
            config.branding.clone(),
        ));
        Self {
            store,
            platform,
            audit,
            config: Arc::new(config),
        }
    }

    pub fn platform_ops(&self) -> Arc<dyn PlatformOps> {
        self.platform.clone()
    }
}

pub fn member(id: u64, name: &str) -> Actor {
    Actor::new(UserId(id), name)
}

pub fn staff(id: u64, name: &str) -> Actor {
    Actor::new(UserId(id), name).with_roles(vec![STAFF_ROLE, REVIEWER_ROLE])
}

pub fn admin(id: u64, name: &str) -> Actor {
    Actor::new(UserId(id), name).with_permissions(Permissions::ADMINISTRATOR)
}
