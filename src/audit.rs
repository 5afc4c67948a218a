use std::sync::Arc;
use tracing::info;

use crate::config::BrandingConfig;
use crate::discord::embeds::branded;
use crate::discord::{ChannelId, Embed, FileUpload, MessageId, MessagePayload, PlatformError, PlatformOps};
use crate::storage::{LogEntry, NewLogEntry, Store, StoreError};

/// Durable audit log plus optional human-readable notices in log channels.
pub struct AuditSink {
    store: Arc<dyn Store>,
    platform: Arc<dyn PlatformOps>,
    branding: BrandingConfig,
}

impl AuditSink {
    pub fn new(store: Arc<dyn Store>, platform: Arc<dyn PlatformOps>, branding: BrandingConfig) -> Self {
        Self {
            store,
            platform,
            branding,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn record(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        let stored = self.store.append_log(&entry).await?;
        info!(
            action = %stored.action,
            actor = ?stored.actor_id,
            log_id = stored.id,
            "Audit entry recorded"
        );
        Ok(stored)
    }

    /// Posts a branded notice to a log channel.
    pub async fn notify(&self, channel: ChannelId, embed: Embed) -> Result<MessageId, PlatformError> {
        let payload = MessagePayload::embeds(branded(&self.branding, embed));
        self.platform.send_message(channel, &payload).await
    }

    pub async fn attach(
        &self,
        channel: ChannelId,
        content: &str,
        file: &FileUpload,
    ) -> Result<MessageId, PlatformError> {
        self.platform.send_file(channel, content, file).await
    }
}
