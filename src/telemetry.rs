use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_telemetry(settings: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))?;

    if settings.json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().compact())
            .with(filter)
            .try_init()?;
    }

    tracing::info!(json = settings.json, "Guildkeeper telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking the log lines of one interaction
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping the handling of a single inbound interaction.
pub fn interaction_span(
    interaction_id: u64,
    kind: &str,
    command: &str,
    actor_id: Option<u64>,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "interaction",
        interaction.id = interaction_id,
        interaction.kind = kind,
        command = command,
        actor.id = actor_id,
        correlation.id = correlation_id,
    )
}
