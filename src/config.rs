use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::discord::types::{ApplicationId, ChannelId, GuildId, RoleId, UserId};

/// Main configuration structure for Guildkeeper
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GuildkeeperConfig {
    /// Bot credentials and guild identity
    pub discord: DiscordConfig,
    /// Channel routing for notices and logs
    pub channels: ChannelConfig,
    /// Roles granted, pinged or checked by the workflows
    pub roles: RoleConfig,
    pub tickets: TicketConfig,
    pub verification: VerificationConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
    /// Embed styling shared by every notice
    pub branding: BrandingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token (can be set via DISCORD_TOKEN)
    pub token: Option<String>,
    pub application_id: Option<ApplicationId>,
    /// Hex-encoded Ed25519 key used to verify interaction requests
    pub public_key: Option<String>,
    /// Guild that receives slash command registrations
    pub guild_id: Option<GuildId>,
    /// Guild owner, allowed to post the verification panel
    pub owner_id: Option<UserId>,
    /// REST API base URL
    pub api_base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Where new application notices are posted
    pub applications: Option<ChannelId>,
    /// Where review decisions are announced
    pub application_results: Option<ChannelId>,
    /// General audit channel
    pub logs: Option<ChannelId>,
    /// Ticket close notices and transcripts
    pub ticket_logs: Option<ChannelId>,
    pub verification_logs: Option<ChannelId>,
    /// Falls back to `logs` when unset
    pub moderation_logs: Option<ChannelId>,
    /// Where the verification panel is posted
    pub verification_panel: Option<ChannelId>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RoleConfig {
    pub staff_application: Option<RoleId>,
    pub gsp_application: Option<RoleId>,
    pub fbi_application: Option<RoleId>,
    /// Pinged on every new application notice
    pub application_ping: Option<RoleId>,
    /// Required to review applications; anyone may review when unset
    pub reviewer: Option<RoleId>,
    pub ticket_support: Option<RoleId>,
    pub ticket_high_rank: Option<RoleId>,
    /// Granted after a successful identity check
    pub verified: Option<RoleId>,
    /// Members holding this role may run moderation commands
    pub staff: Option<RoleId>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Category under which ticket channels are created
    pub category: Option<ChannelId>,
    pub close_delay_seconds: u64,
    /// Number of most recent messages captured in a transcript
    pub transcript_limit: u8,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            category: None,
            close_delay_seconds: 5,
            transcript_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub code_prefix: String,
    pub code_length: usize,
    pub expiry_minutes: u64,
    pub users_api_url: String,
    pub thumbnails_api_url: String,
    /// Maximum number of cached avatar URLs
    pub avatar_cache_capacity: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_prefix: "GSRP-".to_string(),
            code_length: 6,
            expiry_minutes: 10,
            users_api_url: "https://users.roblox.com".to_string(),
            thumbnails_api_url: "https://thumbnails.roblox.com".to_string(),
            avatar_cache_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection string
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://guildkeeper.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the interactions endpoint
    pub bind_address: String,
    /// How long the endpoint waits for a handler's first reply before deferring
    pub initial_response_timeout_ms: u64,
    /// Register slash commands with the platform on startup
    pub register_commands_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            initial_response_timeout_ms: 2500,
            register_commands_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when RUST_LOG is unset
    pub log_level: String,
    /// Structured JSON output instead of compact text
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrandingConfig {
    pub footer: String,
    pub color: u32,
    pub success_color: u32,
    pub danger_color: u32,
    pub warning_color: u32,
    /// Image shown as a standalone embed above each notice
    pub top_banner_url: Option<String>,
    /// Image attached to the bottom of each notice
    pub bottom_banner_url: Option<String>,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            footer: "Georgia State Roleplay".to_string(),
            color: 0x242429,
            success_color: 0x28a745,
            danger_color: 0xdc3545,
            warning_color: 0xffc107,
            top_banner_url: None,
            bottom_banner_url: None,
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            application_id: None,
            public_key: None,
            guild_id: None,
            owner_id: None,
            api_base_url: "https://discord.com/api/v10".to_string(),
        }
    }
}

/// Values required before the bot can talk to the platform.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub application_id: ApplicationId,
    pub public_key: String,
}

impl GuildkeeperConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (guildkeeper.toml, .guildkeeper-rc)
    /// 3. Environment variables (GUILDKEEPER_SECTION__FIELD)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let toml_path = dir.join("guildkeeper.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".guildkeeper-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("GUILDKEEPER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: GuildkeeperConfig = builder.build()?.try_deserialize()?;
        loaded.apply_platform_env();
        Ok(loaded)
    }

    /// Conventional platform variables fill in whatever the layered sources left empty.
    fn apply_platform_env(&mut self) {
        if self.discord.token.is_none() {
            self.discord.token = std::env::var("DISCORD_TOKEN")
                .or_else(|_| std::env::var("DISCORD_BOT_TOKEN"))
                .ok()
                .filter(|token| !token.trim().is_empty());
        }
        if self.discord.public_key.is_none() {
            self.discord.public_key = std::env::var("DISCORD_PUBLIC_KEY").ok();
        }
        if self.discord.application_id.is_none() {
            self.discord.application_id = std::env::var("DISCORD_APPLICATION_ID")
                .ok()
                .and_then(|raw| raw.parse().ok());
        }
        if self.discord.guild_id.is_none() {
            self.discord.guild_id = std::env::var("DISCORD_GUILD_ID")
                .ok()
                .and_then(|raw| raw.parse().ok());
        }
    }

    /// Fails when the bot cannot authenticate with the platform.
    pub fn credentials(&self) -> Result<Credentials> {
        let Some(token) = self.discord.token.clone() else {
            bail!("DISCORD_TOKEN is not set; add it to .env or guildkeeper.toml");
        };
        let Some(application_id) = self.discord.application_id else {
            bail!("discord.application_id is not set");
        };
        let Some(public_key) = self.discord.public_key.clone() else {
            bail!("discord.public_key is not set; interactions cannot be verified");
        };
        Ok(Credentials {
            token,
            application_id,
            public_key,
        })
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GuildkeeperConfig::default();
        assert_eq!(config.tickets.close_delay_seconds, 5);
        assert_eq!(config.tickets.transcript_limit, 100);
        assert_eq!(config.verification.code_prefix, "GSRP-");
        assert_eq!(config.verification.expiry_minutes, 10);
        assert_eq!(config.branding.color, 0x242429);
    }

    #[test]
    fn discord_defaults_point_at_public_api() {
        let discord = DiscordConfig::default();
        assert_eq!(discord.api_base_url, "https://discord.com/api/v10");
        assert!(discord.token.is_none());
        assert_eq!(GuildkeeperConfig::default().discord.api_base_url, discord.api_base_url);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("guildkeeper.toml"),
            r#"
[channels]
logs = "1100"

[roles]
verified = 2200

[tickets]
close_delay_seconds = 1
"#,
        )
        .unwrap();

        let config = GuildkeeperConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.channels.logs, Some(ChannelId(1100)));
        assert_eq!(config.roles.verified, Some(RoleId(2200)));
        assert_eq!(config.tickets.close_delay_seconds, 1);
        assert_eq!(config.tickets.transcript_limit, 100);
    }

    #[test]
    fn saved_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GuildkeeperConfig::default();
        config.roles.staff = Some(RoleId(77));
        config.save_to_file(dir.path().join("guildkeeper.toml")).unwrap();

        let reloaded = GuildkeeperConfig::load_from(dir.path()).unwrap();
        assert_eq!(reloaded.roles.staff, Some(RoleId(77)));
    }

    #[test]
    fn missing_token_is_reported() {
        let config = GuildkeeperConfig::default();
        let err = config.credentials().unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }
}
