use thiserror::Error;

use super::custom_id::{CustomId, UnknownCustomId, REVIEW_REASON_FIELD, USERNAME_FIELD};
use super::interaction::{Interaction, InteractionData, InteractionKind};
use crate::discord::types::*;
use crate::workflows::applications::ReviewAction;
use crate::workflows::moderation::{ModerationCommand, RoleAction, TargetUser};
use crate::workflows::tickets::TicketType;

/// Every action the gateway can route, decoded once from the raw interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    Ping,
    ReviewRequested { application: i64, action: ReviewAction },
    ReviewSubmitted { application: i64, action: ReviewAction, reason: String },
    OpenTicketMenu,
    TicketTypeSelected { kind: TicketType },
    CloseTicketRequested,
    CloseTicketConfirmed,
    CloseTicketCancelled,
    StartVerification,
    VerificationUsernameSubmitted { username: String },
    ConfirmVerification,
    CancelVerification,
    SendVerificationPanel,
    DeployTicketPanel,
    /// `None` means the invoking user.
    UserInfo { user: Option<UserId> },
    ServerInfo,
    Avatar { user: Option<UserId> },
    MemberCount,
    Moderation(ModerationCommand),
}

impl GatewayCommand {
    /// Short name recorded on the interaction span.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ReviewRequested { .. } => "review_requested",
            Self::ReviewSubmitted { .. } => "review_submitted",
            Self::OpenTicketMenu => "open_ticket_menu",
            Self::TicketTypeSelected { .. } => "ticket_type_selected",
            Self::CloseTicketRequested => "close_ticket_requested",
            Self::CloseTicketConfirmed => "close_ticket_confirmed",
            Self::CloseTicketCancelled => "close_ticket_cancelled",
            Self::StartVerification => "start_verification",
            Self::VerificationUsernameSubmitted { .. } => "verification_username",
            Self::ConfirmVerification => "confirm_verification",
            Self::CancelVerification => "cancel_verification",
            Self::SendVerificationPanel => "sendpanel",
            Self::DeployTicketPanel => "deploytickets",
            Self::UserInfo { .. } => "userinfo",
            Self::ServerInfo => "serverinfo",
            Self::Avatar { .. } => "avatar",
            Self::MemberCount => "membercount",
            Self::Moderation(command) => command.name(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("interaction type {0:?} is not handled")]
    Unsupported(InteractionKind),
    #[error(transparent)]
    UnknownComponent(#[from] UnknownCustomId),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

pub fn decode(interaction: &Interaction) -> Result<GatewayCommand, DecodeError> {
    match interaction.kind {
        InteractionKind::Ping => Ok(GatewayCommand::Ping),
        InteractionKind::MessageComponent => decode_component(data(interaction)?),
        InteractionKind::ModalSubmit => decode_modal(data(interaction)?),
        InteractionKind::ApplicationCommand => decode_slash(data(interaction)?),
        InteractionKind::Autocomplete => Err(DecodeError::Unsupported(interaction.kind)),
    }
}

fn data(interaction: &Interaction) -> Result<&InteractionData, DecodeError> {
    interaction.data.as_ref().ok_or(DecodeError::Missing("interaction data"))
}

fn custom_id(data: &InteractionData) -> Result<CustomId, DecodeError> {
    let raw = data.custom_id.as_deref().ok_or(DecodeError::Missing("custom id"))?;
    Ok(raw.parse()?)
}

fn decode_component(data: &InteractionData) -> Result<GatewayCommand, DecodeError> {
    let command = match custom_id(data)? {
        CustomId::ReviewButton { action, application } => GatewayCommand::ReviewRequested { application, action },
        CustomId::OpenTicket => GatewayCommand::OpenTicketMenu,
        CustomId::TicketTypeMenu => {
            let value = data.values.first().ok_or(DecodeError::Missing("selected ticket type"))?;
            let kind = value.parse().map_err(|_| DecodeError::InvalidOption {
                name: "ticket_type",
                reason: format!("'{value}' is not a ticket type"),
            })?;
            GatewayCommand::TicketTypeSelected { kind }
        }
        CustomId::CloseTicket => GatewayCommand::CloseTicketRequested,
        CustomId::ConfirmClose => GatewayCommand::CloseTicketConfirmed,
        CustomId::CancelClose => GatewayCommand::CloseTicketCancelled,
        CustomId::StartVerification => GatewayCommand::StartVerification,
        CustomId::ConfirmVerification => GatewayCommand::ConfirmVerification,
        CustomId::CancelVerification => GatewayCommand::CancelVerification,
        other @ (CustomId::ReviewForm { .. } | CustomId::UsernameForm) => {
            return Err(UnknownCustomId(other.to_string()).into())
        }
    };
    Ok(command)
}

fn decode_modal(data: &InteractionData) -> Result<GatewayCommand, DecodeError> {
    match custom_id(data)? {
        CustomId::ReviewForm { action, application } => Ok(GatewayCommand::ReviewSubmitted {
            application,
            action,
            reason: data
                .text_input(REVIEW_REASON_FIELD)
                .ok_or(DecodeError::Missing("review reason"))?
                .to_string(),
        }),
        CustomId::UsernameForm => Ok(GatewayCommand::VerificationUsernameSubmitted {
            username: data
                .text_input(USERNAME_FIELD)
                .ok_or(DecodeError::Missing("username"))?
                .to_string(),
        }),
        other => Err(UnknownCustomId(other.to_string()).into()),
    }
}

fn target(data: &InteractionData) -> Result<TargetUser, DecodeError> {
    let id = UserId(data.snowflake_option("user").ok_or(DecodeError::Missing("user option"))?);
    let username = data
        .resolved_user(id)
        .map_or_else(|| id.to_string(), |user| user.username.clone());
    Ok(TargetUser { id, username })
}

fn required_string(data: &InteractionData, name: &'static str) -> Result<String, DecodeError> {
    data.string_option(name).ok_or(DecodeError::Missing(name))
}

fn decode_slash(data: &InteractionData) -> Result<GatewayCommand, DecodeError> {
    let name = data.name.as_deref().ok_or(DecodeError::Missing("command name"))?;
    let reason = data.string_option("reason");
    let moderation = match name {
        "sendpanel" => return Ok(GatewayCommand::SendVerificationPanel),
        "deploytickets" => return Ok(GatewayCommand::DeployTicketPanel),
        "userinfo" => {
            return Ok(GatewayCommand::UserInfo {
                user: data.snowflake_option("user").map(UserId),
            })
        }
        "serverinfo" => return Ok(GatewayCommand::ServerInfo),
        "avatar" => {
            return Ok(GatewayCommand::Avatar {
                user: data.snowflake_option("user").map(UserId),
            })
        }
        "membercount" => return Ok(GatewayCommand::MemberCount),
        "ban" => ModerationCommand::Ban {
            target: target(data)?,
            reason,
            delete_messages: data.bool_option("delete_messages").unwrap_or(false),
        },
        "kick" => ModerationCommand::Kick {
            target: target(data)?,
            reason,
        },
        "timeout" => ModerationCommand::Timeout {
            target: target(data)?,
            duration: required_string(data, "duration")?,
            reason,
        },
        "untimeout" => ModerationCommand::Untimeout { target: target(data)? },
        "mute" => ModerationCommand::Mute {
            target: target(data)?,
            reason,
        },
        "unmute" => ModerationCommand::Unmute { target: target(data)? },
        "deafen" => ModerationCommand::Deafen {
            target: target(data)?,
            reason,
        },
        "undeafen" => ModerationCommand::Undeafen { target: target(data)? },
        "warn" => ModerationCommand::Warn {
            target: target(data)?,
            reason: required_string(data, "reason")?,
        },
        "clear" => ModerationCommand::Clear {
            amount: data.integer_option("amount").ok_or(DecodeError::Missing("amount"))?,
            author: data.snowflake_option("user").map(|_| target(data)).transpose()?,
        },
        "slowmode" => ModerationCommand::Slowmode {
            seconds: data.integer_option("seconds").ok_or(DecodeError::Missing("seconds"))?,
        },
        "lock" => ModerationCommand::Lock { reason },
        "unlock" => ModerationCommand::Unlock,
        "role" => {
            let action = match required_string(data, "action")?.as_str() {
                "add" => RoleAction::Add,
                "remove" => RoleAction::Remove,
                other => {
                    return Err(DecodeError::InvalidOption {
                        name: "action",
                        reason: format!("expected add or remove, got '{other}'"),
                    })
                }
            };
            ModerationCommand::Role {
                action,
                target: target(data)?,
                role: RoleId(data.snowflake_option("role").ok_or(DecodeError::Missing("role"))?),
            }
        }
        "nick" => ModerationCommand::Nick {
            target: target(data)?,
            nickname: data.string_option("nickname"),
        },
        "announce" => ModerationCommand::Announce {
            title: required_string(data, "title")?,
            message: required_string(data, "message")?,
            channel: data.snowflake_option("channel").map(ChannelId),
        },
        other => return Err(DecodeError::UnknownCommand(other.to_string())),
    };
    Ok(GatewayCommand::Moderation(moderation))
}
