use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use super::command::{decode, GatewayCommand};
use super::interaction::Interaction;
use super::responder::Responder;
use crate::config::GuildkeeperConfig;
use crate::discord::types::*;
use crate::telemetry::{generate_correlation_id, interaction_span};
use crate::workflows::applications::{ApplicationReview, ReviewSubmission};
use crate::workflows::info::InfoDesk;
use crate::workflows::moderation::{ModerationContext, ModerationDesk};
use crate::workflows::tickets::{TicketCreation, TicketDesk};
use crate::workflows::verification::{StartOutcome, VerificationDesk};
use crate::workflows::{Actor, WorkflowError};

/// Routes decoded interactions to the workflow that owns them.
pub struct Gateway {
    applications: Arc<ApplicationReview>,
    tickets: Arc<TicketDesk>,
    verification: Arc<VerificationDesk>,
    moderation: Arc<ModerationDesk>,
    info: Arc<InfoDesk>,
    config: Arc<GuildkeeperConfig>,
}

/// Everything a handler needs from the raw interaction.
struct Invocation {
    actor: Actor,
    guild: Option<GuildId>,
    channel: Option<ChannelId>,
    source: Option<(ChannelId, MessageId)>,
}

impl Invocation {
    fn guild(&self) -> Result<GuildId, WorkflowError> {
        self.guild
            .ok_or_else(|| WorkflowError::Validation("This can only be used inside the server.".to_string()))
    }

    fn channel(&self) -> Result<ChannelId, WorkflowError> {
        self.channel
            .ok_or_else(|| WorkflowError::Validation("This can only be used inside a channel.".to_string()))
    }
}

fn private(text: impl Into<String>) -> InteractionResponse {
    InteractionResponse::Message(MessagePayload::text(text).ephemeral())
}

impl Gateway {
    pub fn new(
        applications: Arc<ApplicationReview>,
        tickets: Arc<TicketDesk>,
        verification: Arc<VerificationDesk>,
        moderation: Arc<ModerationDesk>,
        info: Arc<InfoDesk>,
        config: Arc<GuildkeeperConfig>,
    ) -> Self {
        Self {
            applications,
            tickets,
            verification,
            moderation,
            info,
            config,
        }
    }

    /// Handles one interaction end to end. Failures are reported to the actor, never propagated.
    pub async fn handle(&self, interaction: Interaction, responder: Arc<dyn Responder>) {
        let command = decode(&interaction);
        let actor = interaction.actor();
        let span = interaction_span(
            interaction.id.get(),
            interaction.kind.as_str(),
            command.as_ref().map_or("undecodable", GatewayCommand::name),
            actor.as_ref().map(|a| a.id.get()),
            &generate_correlation_id(),
        );

        async move {
            let command = match command {
                Ok(command) => command,
                Err(e) => {
                    warn!(error = %e, custom_id = ?interaction.custom_id(), "Could not decode interaction");
                    self.reply(&*responder, private("❌ This action is not supported."))
                        .await;
                    return;
                }
            };
            if command == GatewayCommand::Ping {
                self.reply(&*responder, InteractionResponse::Pong).await;
                return;
            }
            let Some(actor) = actor else {
                warn!("Interaction carried no user");
                self.reply(&*responder, private("❌ Could not identify you.")).await;
                return;
            };

            let invocation = Invocation {
                actor,
                guild: interaction.guild_id,
                channel: interaction.channel_id,
                source: interaction.message.as_ref().map(|m| (m.channel_id, m.id)),
            };
            match self.dispatch(command, &invocation, &*responder).await {
                Ok(()) => info!("Interaction handled"),
                Err(e) => {
                    match &e {
                        WorkflowError::External { .. } => error!(error = %e, "Interaction failed"),
                        _ => info!(error = %e, "Interaction rejected"),
                    }
                    self.reply(&*responder, private(e.user_message())).await;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn reply(&self, responder: &dyn Responder, response: InteractionResponse) {
        if let Err(e) = responder.respond(response).await {
            warn!(error = %e, "Failed to deliver interaction response");
        }
    }

    async fn edit(&self, responder: &dyn Responder, message: MessagePayload) {
        if let Err(e) = responder.edit(&message).await {
            warn!(error = %e, "Failed to update interaction response");
        }
    }

    async fn dispatch(
        &self,
        command: GatewayCommand,
        invocation: &Invocation,
        responder: &dyn Responder,
    ) -> Result<(), WorkflowError> {
        let actor = &invocation.actor;
        match command {
            GatewayCommand::Ping => self.reply(responder, InteractionResponse::Pong).await,

            GatewayCommand::ReviewRequested { application, action } => {
                let form = self.applications.request_review(actor, application, action).await?;
                self.reply(responder, InteractionResponse::Modal(form)).await;
            }
            GatewayCommand::ReviewSubmitted {
                application,
                action,
                reason,
            } => {
                self.applications.authorize_reviewer(actor)?;
                self.reply(responder, InteractionResponse::DeferredMessage { ephemeral: true })
                    .await;
                let decided = self
                    .applications
                    .finalize_review(ReviewSubmission {
                        application_id: application,
                        action,
                        reason,
                        reviewer: actor.clone(),
                        guild: invocation.guild()?,
                        notice: invocation.source,
                    })
                    .await?;
                self.edit(
                    responder,
                    MessagePayload::text(format!(
                        "✅ Application #{} has been {}.",
                        decided.outcome.id, decided.outcome.status
                    )),
                )
                .await;
            }

            GatewayCommand::OpenTicketMenu => {
                self.reply(responder, InteractionResponse::Message(self.tickets.type_menu()))
                    .await;
            }
            GatewayCommand::TicketTypeSelected { kind } => {
                let guild = invocation.guild()?;
                self.reply(
                    responder,
                    InteractionResponse::UpdateMessage(
                        MessagePayload::text("⏳ Creating your ticket...").clear_components(),
                    ),
                )
                .await;
                let created = self.tickets.create_ticket(guild, actor, kind).await?;
                let text = match &created.outcome {
                    TicketCreation::Created(ticket) => {
                        format!("✅ Your ticket has been created: {}", ticket.channel.mention())
                    }
                    TicketCreation::AlreadyOpen(ticket) => format!(
                        "You already have an open {} ticket: {}",
                        ticket.kind.label(),
                        ticket.channel.mention()
                    ),
                };
                self.edit(responder, MessagePayload::text(text)).await;
            }
            GatewayCommand::CloseTicketRequested => {
                self.reply(responder, InteractionResponse::Message(self.tickets.request_close()))
                    .await;
            }
            GatewayCommand::CloseTicketConfirmed => {
                let channel = invocation.channel()?;
                self.reply(
                    responder,
                    InteractionResponse::UpdateMessage(
                        MessagePayload::text("🔒 Closing ticket...").clear_components(),
                    ),
                )
                .await;
                self.tickets.confirm_close(channel, actor).await?;
                self.edit(
                    responder,
                    MessagePayload::text(format!(
                        "🔒 Ticket closed. This channel will be deleted in {} seconds.",
                        self.config.tickets.close_delay_seconds
                    )),
                )
                .await;
            }
            GatewayCommand::CloseTicketCancelled => {
                self.reply(responder, InteractionResponse::UpdateMessage(self.tickets.cancel_close()))
                    .await;
            }

            GatewayCommand::StartVerification => {
                let response = match self.verification.start(actor) {
                    StartOutcome::AlreadyVerified => private("✅ You are already verified!"),
                    StartOutcome::UsernameForm(form) => InteractionResponse::Modal(form),
                };
                self.reply(responder, response).await;
            }
            GatewayCommand::VerificationUsernameSubmitted { username } => {
                self.reply(responder, InteractionResponse::DeferredMessage { ephemeral: true })
                    .await;
                let issued = self.verification.issue(actor, &username).await?;
                self.edit(responder, self.verification.issued_message(&issued.outcome))
                    .await;
            }
            GatewayCommand::ConfirmVerification => {
                let guild = invocation.guild()?;
                self.reply(responder, InteractionResponse::DeferredMessage { ephemeral: true })
                    .await;
                let checked = self.verification.confirm(actor, guild).await?;
                self.edit(responder, self.verification.outcome_message(&checked.outcome))
                    .await;
            }
            GatewayCommand::CancelVerification => {
                self.verification.cancel(actor.id).await;
                self.reply(
                    responder,
                    InteractionResponse::UpdateMessage(
                        MessagePayload::text("Verification cancelled.")
                            .with_embeds(Vec::new())
                            .clear_components(),
                    ),
                )
                .await;
            }

            GatewayCommand::SendVerificationPanel => {
                self.verification.authorize_panel(actor)?;
                let channel = match self.config.channels.verification_panel {
                    Some(channel) => channel,
                    None => invocation.channel()?,
                };
                self.verification.post_panel(channel).await?;
                self.reply(responder, private("✅ Verification panel sent!")).await;
            }
            GatewayCommand::DeployTicketPanel => {
                self.tickets.authorize_panel(actor)?;
                self.tickets.open_panel(invocation.channel()?).await?;
                self.reply(responder, private("✅ Ticket panel deployed!")).await;
            }

            GatewayCommand::UserInfo { user } => {
                self.reply(responder, InteractionResponse::DeferredMessage { ephemeral: false })
                    .await;
                let reply = self.info.user_info(invocation.guild, user.unwrap_or(actor.id)).await?;
                self.edit(responder, reply).await;
            }
            GatewayCommand::ServerInfo => {
                let guild = invocation.guild()?;
                self.reply(responder, InteractionResponse::DeferredMessage { ephemeral: false })
                    .await;
                self.edit(responder, self.info.server_info(guild).await?).await;
            }
            GatewayCommand::Avatar { user } => {
                self.reply(responder, InteractionResponse::DeferredMessage { ephemeral: false })
                    .await;
                self.edit(responder, self.info.avatar(user.unwrap_or(actor.id)).await?)
                    .await;
            }
            GatewayCommand::MemberCount => {
                let guild = invocation.guild()?;
                self.reply(responder, InteractionResponse::DeferredMessage { ephemeral: false })
                    .await;
                self.edit(responder, self.info.member_count(guild).await?).await;
            }

            GatewayCommand::Moderation(command) => {
                self.moderation.authorize(actor)?;
                command.validate()?;
                let context = ModerationContext {
                    actor: actor.clone(),
                    guild: invocation.guild()?,
                    channel: invocation.channel()?,
                };
                self.reply(
                    responder,
                    InteractionResponse::DeferredMessage {
                        ephemeral: command.replies_privately(),
                    },
                )
                .await;
                let done = self.moderation.execute(&context, command).await?;
                self.edit(responder, done.outcome).await;
            }
        }
        Ok(())
    }
}
