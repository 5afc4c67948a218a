// Guildkeeper Library - Discord community management
// This exposes the core components for testing and integration

pub mod audit;
pub mod config;
pub mod discord;
pub mod gateway;
pub mod identity;
pub mod observability;
pub mod shutdown;
pub mod storage;
pub mod telemetry;
pub mod workflows;

#[cfg(test)]
pub mod testing;

// Re-export key types for easy access
pub use audit::AuditSink;
pub use config::{Credentials, GuildkeeperConfig};
pub use discord::{DiscordClient, PlatformError, PlatformOps};
pub use gateway::{Gateway, GatewayCommand, Interaction, ServerState, SignatureVerifier};
pub use identity::{ExternalIdentity, IdentityError, IdentityProvider, RobloxClient};
pub use observability::{platform_metrics, ApiService, CallOutcome, OperationTimer, PlatformApiMetrics};
pub use shutdown::ShutdownCoordinator;
pub use storage::{Application, ApplicationStatus, ApplicationType, InMemoryStore, LogEntry, Store, StoreError};
#[cfg(feature = "database")]
pub use storage::SqliteStore;
pub use telemetry::{generate_correlation_id, init_telemetry, interaction_span};
pub use workflows::applications::ApplicationReview;
pub use workflows::info::InfoDesk;
pub use workflows::moderation::ModerationDesk;
pub use workflows::tickets::TicketDesk;
pub use workflows::verification::VerificationDesk;
pub use workflows::{Actor, SideEffect, Transition, WorkflowError};
