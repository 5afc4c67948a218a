use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use guildkeeper::gateway::registration;
use guildkeeper::gateway::server::{self, ServerState};
use guildkeeper::workflows::applications::ApplicationSubmission;
use guildkeeper::{
    init_telemetry, ApplicationReview, AuditSink, DiscordClient, Gateway, GuildkeeperConfig, InfoDesk, ModerationDesk,
    PlatformOps, RobloxClient, ShutdownCoordinator, SignatureVerifier, Store, TicketDesk, VerificationDesk,
};

#[derive(Parser)]
#[command(name = "guildkeeper")]
#[command(about = "Discord community management: applications, tickets, verification and moderation")]
#[command(long_about = "Guildkeeper answers Discord interactions over HTTP. Run it without a subcommand \
                       (or with 'serve') to start the interactions endpoint.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactions endpoint (default)
    Serve,
    /// Register slash commands with the configured guild
    RegisterCommands,
    /// Inspect or submit applications
    Applications {
        #[command(subcommand)]
        action: ApplicationCommands,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ApplicationCommands {
    /// List stored applications, newest first
    List,
    /// Show one application with its answers
    Show { id: i64 },
    /// Submit an application from a JSON file and announce it to reviewers
    Submit { file: PathBuf },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default guildkeeper.toml
    Init {
        #[arg(long, default_value = "guildkeeper.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    GuildkeeperConfig::load_env_file()?;
    let config = GuildkeeperConfig::load().context("Failed to load configuration")?;
    init_telemetry(&config.observability)?;

    match cli.command {
        None | Some(Commands::Serve) => tokio::runtime::Runtime::new()?.block_on(serve_command(config)),
        Some(Commands::RegisterCommands) => {
            tokio::runtime::Runtime::new()?.block_on(register_commands_command(config))
        }
        Some(Commands::Applications { action }) => {
            tokio::runtime::Runtime::new()?.block_on(applications_command(config, action))
        }
        Some(Commands::Config {
            action: ConfigCommands::Init { path, force },
        }) => config_init_command(path, force),
    }
}

/// Shared handles every workflow is built from.
struct Services {
    store: Arc<dyn Store>,
    platform: Arc<dyn PlatformOps>,
    audit: Arc<AuditSink>,
    config: Arc<GuildkeeperConfig>,
}

async fn open_store(config: &GuildkeeperConfig) -> Result<Arc<dyn Store>> {
    #[cfg(feature = "database")]
    {
        let store = guildkeeper::SqliteStore::connect(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("Failed to open database {}", config.database.url))?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "database"))]
    {
        warn!(url = %config.database.url, "Built without database support; applications are kept in memory");
        Ok(Arc::new(guildkeeper::InMemoryStore::new()))
    }
}

async fn build_services(config: GuildkeeperConfig) -> Result<Services> {
    let credentials = config.credentials()?;
    let platform: Arc<dyn PlatformOps> = Arc::new(DiscordClient::new(
        &credentials.token,
        credentials.application_id,
        config.discord.api_base_url.clone(),
    )?);
    let store = open_store(&config).await?;
    let audit = Arc::new(AuditSink::new(store.clone(), platform.clone(), config.branding.clone()));
    Ok(Services {
        store,
        platform,
        audit,
        config: Arc::new(config),
    })
}

async fn serve_command(config: GuildkeeperConfig) -> Result<()> {
    let public_key = config
        .credentials()
        .inspect_err(|e| error!(error = %e, "Missing mandatory credential"))?
        .public_key;
    let verifier = SignatureVerifier::from_hex(&public_key).context("discord.public_key is invalid")?;
    let services = build_services(config).await?;
    let config = services.config.clone();

    let identity = Arc::new(RobloxClient::new(&config.verification)?);
    let gateway = Gateway::new(
        Arc::new(ApplicationReview::new(
            services.store.clone(),
            services.platform.clone(),
            services.audit.clone(),
            config.clone(),
        )),
        Arc::new(TicketDesk::new(services.platform.clone(), services.audit.clone(), config.clone())),
        Arc::new(VerificationDesk::new(
            services.platform.clone(),
            identity,
            services.audit.clone(),
            config.clone(),
        )),
        Arc::new(ModerationDesk::new(services.platform.clone(), services.audit.clone(), config.clone())),
        Arc::new(InfoDesk::new(services.platform.clone(), config.clone())),
        config.clone(),
    );

    if config.server.register_commands_on_start {
        match config.discord.guild_id {
            Some(guild) => {
                if let Err(e) = registration::register(services.platform.as_ref(), guild).await {
                    warn!(error = %e, "Slash command registration failed; continuing with existing commands");
                }
            }
            None => warn!("discord.guild_id is not set; skipping slash command registration"),
        }
    }

    let state = ServerState {
        gateway: Arc::new(gateway),
        platform: services.platform.clone(),
        verifier: Arc::new(verifier),
        initial_response_timeout: Duration::from_millis(config.server.initial_response_timeout_ms),
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Guildkeeper");
    let result = server::serve(&config.server.bind_address, state, ShutdownCoordinator::wait_for_signal()).await;

    ShutdownCoordinator::new(services.store).shutdown_all_services().await;
    result
}

async fn register_commands_command(config: GuildkeeperConfig) -> Result<()> {
    let Some(guild) = config.discord.guild_id else {
        bail!("discord.guild_id is not set; nothing to register against");
    };
    let services = build_services(config).await?;

    println!("🔄 Registering slash commands with guild {guild}...");
    let count = registration::register(services.platform.as_ref(), guild).await?;
    println!("✅ Registered {count} commands");
    Ok(())
}

async fn applications_command(config: GuildkeeperConfig, action: ApplicationCommands) -> Result<()> {
    match action {
        ApplicationCommands::List => {
            let store = open_store(&config).await?;
            let applications = store.list_applications().await?;
            if applications.is_empty() {
                println!("📋 No applications stored");
            }
            for application in &applications {
                println!(
                    "#{:<5} {:<8} {:<10} {} ({}) {}",
                    application.id,
                    application.kind.as_str(),
                    application.status.as_str(),
                    application.submitter_name,
                    application.submitter_id,
                    application.created_at.format("%Y-%m-%d %H:%M"),
                );
            }
            store.close().await;
        }
        ApplicationCommands::Show { id } => {
            let store = open_store(&config).await?;
            let Some(application) = store.get_application(id).await? else {
                bail!("Application #{id} not found");
            };
            println!("📋 Application #{} ({})", application.id, application.kind.display_name());
            println!("   Applicant: {} ({})", application.submitter_name, application.submitter_id);
            println!("   Status:    {}", application.status.as_str());
            if let (Some(reviewer), Some(reason)) = (application.reviewer_id, &application.review_reason) {
                println!("   Reviewed by {reviewer}: {reason}");
            }
            println!();
            for (index, answer) in application.answers.iter().enumerate() {
                println!("{}. {}", index + 1, answer.question);
                println!("   {}", answer.answer);
            }
            store.close().await;
        }
        ApplicationCommands::Submit { file } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let submission: ApplicationSubmission =
                serde_json::from_str(&raw).with_context(|| format!("{} is not a valid submission", file.display()))?;
            let services = build_services(config).await?;
            let review = ApplicationReview::new(
                services.store.clone(),
                services.platform.clone(),
                services.audit.clone(),
                services.config.clone(),
            );

            let transition = review.submit(submission).await?;
            println!("✅ Stored application #{}", transition.outcome.id);
            for failure in transition.failures() {
                println!("⚠️  {:?}: {:?}", failure.effect, failure.outcome);
            }
            services.store.close().await;
        }
    }
    Ok(())
}

fn config_init_command(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    GuildkeeperConfig::default().save_to_file(&path)?;
    println!("✅ Wrote default configuration to {}", path.display());
    println!("   Set DISCORD_TOKEN, DISCORD_APPLICATION_ID and DISCORD_PUBLIC_KEY in .env before serving.");
    Ok(())
}
