use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::discord::types::{InteractionId, InteractionResponse, MessagePayload};
use crate::discord::{PlatformError, PlatformOps};

/// Reply channel for one interaction.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Sends the initial response, or edits it when the interaction was already acknowledged.
    async fn respond(&self, response: InteractionResponse) -> Result<(), PlatformError>;
    /// Replaces the acknowledged response.
    async fn edit(&self, message: &MessagePayload) -> Result<(), PlatformError>;
}

/// Answers the first response through the pending HTTP request and later ones through the webhook.
pub struct HttpResponder {
    initial: Mutex<Option<oneshot::Sender<InteractionResponse>>>,
    platform: Arc<dyn PlatformOps>,
    interaction: InteractionId,
    token: String,
}

impl HttpResponder {
    pub fn new(
        initial: oneshot::Sender<InteractionResponse>,
        platform: Arc<dyn PlatformOps>,
        interaction: InteractionId,
        token: impl Into<String>,
    ) -> Self {
        Self {
            initial: Mutex::new(Some(initial)),
            platform,
            interaction,
            token: token.into(),
        }
    }

    async fn follow_up(&self, response: InteractionResponse) -> Result<(), PlatformError> {
        match response {
            InteractionResponse::Message(message) | InteractionResponse::UpdateMessage(message) => {
                self.platform.edit_original_response(&self.token, &message).await
            }
            InteractionResponse::DeferredMessage { .. } | InteractionResponse::DeferredUpdate => {
                debug!(interaction = %self.interaction, "Interaction already acknowledged");
                Ok(())
            }
            InteractionResponse::Pong | InteractionResponse::Modal(_) => Err(PlatformError::InvalidRequest(
                "response type is only valid as the initial reply".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Responder for HttpResponder {
    async fn respond(&self, response: InteractionResponse) -> Result<(), PlatformError> {
        let pending = self.initial.lock().await.take();
        match pending {
            Some(sender) => match sender.send(response) {
                Ok(()) => Ok(()),
                // The endpoint stopped waiting and deferred on the handler's behalf.
                Err(response) => self.follow_up(response).await,
            },
            None => self.follow_up(response).await,
        }
    }

    async fn edit(&self, message: &MessagePayload) -> Result<(), PlatformError> {
        self.platform.edit_original_response(&self.token, message).await
    }
}
