use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Actor, KeyedLocks, SideEffect, Transition, WorkflowError};
use crate::audit::AuditSink;
use crate::config::GuildkeeperConfig;
use crate::discord::embeds::branded;
use crate::discord::types::*;
use crate::discord::PlatformOps;
use crate::gateway::custom_id::{CustomId, USERNAME_FIELD};
use crate::identity::{ExternalIdentity, IdentityProvider};
use crate::storage::NewLogEntry;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 20;

/// `prefix` followed by `length` characters drawn from A-Z and 0-9.
pub fn generate_code(prefix: &str, length: usize) -> String {
    let mut rng = rand::rng();
    let body: String = (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}{body}")
}

/// The code may appear anywhere in the profile text; matching is case-sensitive.
pub fn description_contains_code(description: &str, code: &str) -> bool {
    description.contains(code)
}

/// Converts the configured expiry into a window, rejecting values chrono cannot represent.
pub fn expiry_window(minutes: u64) -> Result<chrono::Duration, WorkflowError> {
    i64::try_from(minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or_else(|| {
            WorkflowError::Validation(format!(
                "Verification expiry of {minutes} minutes is out of range; ask staff to fix the configuration."
            ))
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVerification {
    pub owner: UserId,
    pub identity: ExternalIdentity,
    pub code: String,
    pub avatar_url: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Distinguishes re-issued codes so a stale expiry timer cannot remove a newer one.
    pub generation: u64,
}

impl PendingVerification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// At most one live code per member. Expired entries are dropped on read.
#[derive(Debug, Default)]
pub struct VerificationRegistry {
    entries: Mutex<HashMap<UserId, PendingVerification>>,
    generations: AtomicU64,
}

impl VerificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fresh code for `owner`, replacing any previous one.
    pub async fn insert(
        &self,
        owner: UserId,
        identity: ExternalIdentity,
        code: String,
        avatar_url: Option<String>,
        ttl: chrono::Duration,
    ) -> PendingVerification {
        let issued_at = Utc::now();
        let pending = PendingVerification {
            owner,
            identity,
            code,
            avatar_url,
            issued_at,
            expires_at: issued_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
        };
        self.entries.lock().await.insert(owner, pending.clone());
        pending
    }

    pub async fn live(&self, owner: UserId) -> Option<PendingVerification> {
        self.live_at(owner, Utc::now()).await
    }

    pub async fn live_at(&self, owner: UserId, now: DateTime<Utc>) -> Option<PendingVerification> {
        let mut entries = self.entries.lock().await;
        match entries.get(&owner) {
            Some(pending) if pending.is_expired(now) => {
                debug!(owner = %owner, "Dropping expired verification code");
                entries.remove(&owner);
                None
            }
            Some(pending) => Some(pending.clone()),
            None => None,
        }
    }

    /// Removes the entry only if it is still the given generation.
    pub async fn expire(&self, owner: UserId, generation: u64) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.get(&owner).is_some_and(|p| p.generation == generation) {
            entries.remove(&owner);
            true
        } else {
            false
        }
    }

    pub async fn remove(&self, owner: UserId) -> Option<PendingVerification> {
        self.entries.lock().await.remove(&owner)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyVerified,
    UsernameForm(Modal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    pub identity: ExternalIdentity,
    pub code: String,
    pub avatar_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Verified {
        identity: ExternalIdentity,
        avatar_url: Option<String>,
    },
    /// The profile did not contain the code; the pending entry is kept for another try.
    CodeNotFound { code: String },
}

pub struct VerificationDesk {
    platform: Arc<dyn PlatformOps>,
    identity: Arc<dyn IdentityProvider>,
    audit: Arc<AuditSink>,
    config: Arc<GuildkeeperConfig>,
    registry: Arc<VerificationRegistry>,
    locks: KeyedLocks<UserId>,
}

impl VerificationDesk {
    pub fn new(
        platform: Arc<dyn PlatformOps>,
        identity: Arc<dyn IdentityProvider>,
        audit: Arc<AuditSink>,
        config: Arc<GuildkeeperConfig>,
    ) -> Self {
        Self {
            platform,
            identity,
            audit,
            config,
            registry: Arc::new(VerificationRegistry::new()),
            locks: KeyedLocks::new(),
        }
    }

    pub fn registry(&self) -> &Arc<VerificationRegistry> {
        &self.registry
    }

    /// The guild owner may post the panel; administrators may when no owner is configured.
    pub fn authorize_panel(&self, actor: &Actor) -> Result<(), WorkflowError> {
        let allowed = match self.config.discord.owner_id {
            Some(owner) => actor.id == owner,
            None => actor.is_administrator(),
        };
        if allowed {
            Ok(())
        } else {
            Err(WorkflowError::PermissionDenied(
                "Only the server owner can post the verification panel.".to_string(),
            ))
        }
    }

    pub async fn post_panel(&self, channel: ChannelId) -> Result<MessageId, WorkflowError> {
        let embed = Embed::new().title("🔐 Roblox Verification").description(
            "Link your Roblox account to gain access to the server.\n\n\
             Press **Verify** and enter your Roblox username. You will receive a code to place \
             in your Roblox profile description.",
        );
        let payload = MessagePayload::embeds(branded(&self.config.branding, embed)).with_components(vec![
            ActionRow::new(vec![Component::button(
                ButtonStyle::Success,
                "✅ Verify",
                CustomId::StartVerification.to_string(),
            )]),
        ]);
        let message = self
            .platform
            .send_message(channel, &payload)
            .await
            .map_err(|e| WorkflowError::external("post the verification panel", e))?;
        info!(channel = %channel, "Verification panel posted");
        Ok(message)
    }

    pub fn start(&self, actor: &Actor) -> StartOutcome {
        if self
            .config
            .roles
            .verified
            .is_some_and(|role| actor.has_role(role))
        {
            return StartOutcome::AlreadyVerified;
        }
        StartOutcome::UsernameForm(Modal {
            custom_id: CustomId::UsernameForm.to_string(),
            title: "Roblox Verification".to_string(),
            components: vec![ActionRow::new(vec![Component::text_input(
                USERNAME_FIELD,
                "Roblox Username",
                TextInputStyle::Short,
                (MIN_USERNAME_CHARS as u16, MAX_USERNAME_CHARS as u16),
                Some("Enter your Roblox username"),
            )])],
        })
    }

    /// Looks the username up and hands out a new code, invalidating any previous one.
    pub async fn issue(&self, owner: &Actor, username: &str) -> Result<Transition<IssuedCode>, WorkflowError> {
        let username = username.trim();
        let length = username.chars().count();
        if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&length) {
            return Err(WorkflowError::Validation(format!(
                "Roblox usernames are {MIN_USERNAME_CHARS} to {MAX_USERNAME_CHARS} characters long."
            )));
        }

        let settings = &self.config.verification;
        let ttl = expiry_window(settings.expiry_minutes)?;

        let _guard = self.locks.lock(owner.id).await;

        let identity = self
            .identity
            .lookup_username(username)
            .await
            .map_err(|e| WorkflowError::external("look up your Roblox account", e))?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!(
                    "Could not find a Roblox user named **{username}**. Check the spelling and try again."
                ))
            })?;

        let code = generate_code(&settings.code_prefix, settings.code_length);

        let mut avatar_report = Transition::new(());
        let avatar_url = avatar_report
            .attempt(SideEffect::AvatarLookup, self.identity.fetch_avatar(identity.id))
            .await
            .flatten();

        let pending = self
            .registry
            .insert(owner.id, identity.clone(), code.clone(), avatar_url.clone(), ttl)
            .await;
        info!(
            owner = %owner.id,
            roblox_id = identity.id,
            generation = pending.generation,
            "Verification code issued"
        );

        let mut transition = Transition::new(IssuedCode {
            identity,
            code,
            avatar_url,
            expires_at: pending.expires_at,
        });
        transition.side_effects.extend(avatar_report.side_effects);
        self.schedule_expiry(owner.id, pending.generation, ttl);
        transition.applied(SideEffect::ExpiryTimer);
        Ok(transition)
    }

    fn schedule_expiry(&self, owner: UserId, generation: u64, ttl: chrono::Duration) {
        let registry = self.registry.clone();
        let delay = ttl.to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.expire(owner, generation).await {
                debug!(owner = %owner, generation, "Verification code expired");
            }
        });
    }

    /// Checks the profile for the live code and grants the verified role on a match.
    pub async fn confirm(&self, owner: &Actor, guild: GuildId) -> Result<Transition<ConfirmOutcome>, WorkflowError> {
        let _guard = self.locks.lock(owner.id).await;

        let pending = self.registry.live(owner.id).await.ok_or_else(|| {
            WorkflowError::NotFound("Your verification session has expired. Please start again.".to_string())
        })?;

        let description = self
            .identity
            .fetch_description(pending.identity.id)
            .await
            .map_err(|e| WorkflowError::external("read your Roblox profile", e))?;

        if !description_contains_code(&description, &pending.code) {
            info!(owner = %owner.id, roblox_id = pending.identity.id, "Verification code not found in profile");
            let mut transition = Transition::new(ConfirmOutcome::CodeNotFound {
                code: pending.code.clone(),
            });
            let entry = NewLogEntry::new(
                "verification_failed",
                format!(
                    "Roblox: {} ({}), Reason: code not found in profile",
                    pending.identity.name, pending.identity.id
                ),
            )
            .by(owner.id, owner.username.clone());
            transition
                .attempt(SideEffect::AuditEntry, self.audit.record(entry))
                .await;
            return Ok(transition);
        }

        let role = self.config.roles.verified.ok_or_else(|| {
            WorkflowError::Validation("The verified role is not configured. Please contact staff.".to_string())
        })?;
        let reason = format!("Verified as Roblox user {}", pending.identity.name);
        self.platform
            .add_role(guild, owner.id, role, Some(&reason))
            .await
            .map_err(|e| WorkflowError::external("grant the verified role", e))?;

        self.registry.remove(owner.id).await;
        info!(owner = %owner.id, roblox_id = pending.identity.id, "Member verified");

        let mut transition = Transition::new(ConfirmOutcome::Verified {
            identity: pending.identity.clone(),
            avatar_url: pending.avatar_url.clone(),
        });
        transition.applied(SideEffect::RoleGrant);
        transition
            .attempt(
                SideEffect::Rename,
                self.platform
                    .set_nickname(guild, owner.id, Some(&pending.identity.name)),
            )
            .await;

        let entry = NewLogEntry::new(
            "verification_success",
            format!("Roblox: {} ({})", pending.identity.name, pending.identity.id),
        )
        .by(owner.id, owner.username.clone());
        transition
            .attempt(SideEffect::AuditEntry, self.audit.record(entry))
            .await;

        match self.config.channels.verification_logs {
            Some(channel) => {
                let mut embed = Embed::new()
                    .title("✅ Member Verified")
                    .field("Member", owner.id.mention(), true)
                    .field(
                        "Roblox Account",
                        format!("[{}]({})", pending.identity.name, pending.identity.profile_url()),
                        true,
                    )
                    .field("Roblox ID", pending.identity.id.to_string(), true);
                if let Some(avatar) = &pending.avatar_url {
                    embed = embed.thumbnail(avatar.clone());
                }
                transition
                    .attempt(SideEffect::LogNotice, self.audit.notify(channel, embed))
                    .await;
            }
            None => transition.skip(SideEffect::LogNotice, "verification log channel not configured"),
        }

        Ok(transition)
    }

    /// Discards the member's pending code. Returns whether one existed.
    pub async fn cancel(&self, owner: UserId) -> bool {
        let _guard = self.locks.lock(owner).await;
        let removed = self.registry.remove(owner).await.is_some();
        info!(owner = %owner, removed, "Verification cancelled");
        removed
    }

    pub fn issued_message(&self, issued: &IssuedCode) -> MessagePayload {
        let mut embed = Embed::new()
            .title("🔐 Roblox Verification")
            .description(format!(
                "**Step 1:** Open your [Roblox profile]({}).\n\
                 **Step 2:** Add this code anywhere in your About section:\n```{}```\n\
                 **Step 3:** Save your profile and press **Confirm** below.\n\n\
                 This code expires <t:{}:R>.",
                issued.identity.profile_url(),
                issued.code,
                issued.expires_at.timestamp()
            ))
            .field("Roblox Account", format!("{} ({})", issued.identity.name, issued.identity.id), false);
        if let Some(avatar) = &issued.avatar_url {
            embed = embed.thumbnail(avatar.clone());
        }
        MessagePayload::embeds(branded(&self.config.branding, embed)).with_components(vec![ActionRow::new(vec![
            Component::button(ButtonStyle::Success, "Confirm", CustomId::ConfirmVerification.to_string()),
            Component::button(ButtonStyle::Danger, "Cancel", CustomId::CancelVerification.to_string()),
        ])])
    }

    pub fn outcome_message(&self, outcome: &ConfirmOutcome) -> MessagePayload {
        match outcome {
            ConfirmOutcome::Verified { identity, avatar_url } => {
                let mut embed = Embed::new()
                    .title("✅ Verification Successful")
                    .color(self.config.branding.success_color)
                    .description(format!(
                        "You have been verified as **{}**. Welcome to the server!",
                        identity.name
                    ));
                if let Some(avatar) = avatar_url {
                    embed = embed.thumbnail(avatar.clone());
                }
                MessagePayload::embeds(branded(&self.config.branding, embed))
            }
            ConfirmOutcome::CodeNotFound { code } => MessagePayload::text(format!(
                "❌ Verification code not found in your Roblox profile.\n\n\
                 Please make sure that:\n\
                 • `{code}` is in your profile description (About section)\n\
                 • You saved your profile after adding it\n\
                 • Your profile is not private\n\n\
                 Then press **Confirm** again."
            )),
        }
    }
}
