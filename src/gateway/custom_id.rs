use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::workflows::applications::ReviewAction;

/// Text input inside the review reason form.
pub const REVIEW_REASON_FIELD: &str = "review_reason";
/// Text input inside the verification username form.
pub const USERNAME_FIELD: &str = "roblox_username";

/// Identifier attached to every button, menu and form the bot posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomId {
    ReviewButton { action: ReviewAction, application: i64 },
    ReviewForm { action: ReviewAction, application: i64 },
    OpenTicket,
    TicketTypeMenu,
    CloseTicket,
    ConfirmClose,
    CancelClose,
    StartVerification,
    UsernameForm,
    ConfirmVerification,
    CancelVerification,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized custom id '{0}'")]
pub struct UnknownCustomId(pub String);

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReviewButton { action, application } => write!(f, "app_{}_{application}", action.as_str()),
            Self::ReviewForm { action, application } => {
                write!(f, "app_review_{}_{application}", action.as_str())
            }
            Self::OpenTicket => f.write_str("create_ticket"),
            Self::TicketTypeMenu => f.write_str("ticket_type_select"),
            Self::CloseTicket => f.write_str("close_ticket"),
            Self::ConfirmClose => f.write_str("confirm_close_ticket"),
            Self::CancelClose => f.write_str("cancel_close_ticket"),
            Self::StartVerification => f.write_str("start_verification"),
            Self::UsernameForm => f.write_str("roblox_username_modal"),
            Self::ConfirmVerification => f.write_str("confirm_verification"),
            Self::CancelVerification => f.write_str("cancel_verification"),
        }
    }
}

fn action_and_id(rest: &str) -> Option<(ReviewAction, i64)> {
    let (action, id) = rest.split_once('_')?;
    Some((action.parse().ok()?, id.parse().ok()?))
}

impl FromStr for CustomId {
    type Err = UnknownCustomId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let fixed = match raw {
            "create_ticket" => Some(Self::OpenTicket),
            "ticket_type_select" => Some(Self::TicketTypeMenu),
            "close_ticket" => Some(Self::CloseTicket),
            "confirm_close_ticket" => Some(Self::ConfirmClose),
            "cancel_close_ticket" => Some(Self::CancelClose),
            "start_verification" => Some(Self::StartVerification),
            "roblox_username_modal" => Some(Self::UsernameForm),
            "confirm_verification" => Some(Self::ConfirmVerification),
            "cancel_verification" => Some(Self::CancelVerification),
            _ => None,
        };
        if let Some(id) = fixed {
            return Ok(id);
        }

        let parsed = if let Some(rest) = raw.strip_prefix("app_review_") {
            action_and_id(rest).map(|(action, application)| Self::ReviewForm { action, application })
        } else if let Some(rest) = raw.strip_prefix("app_") {
            action_and_id(rest).map(|(action, application)| Self::ReviewButton { action, application })
        } else {
            None
        };
        parsed.ok_or_else(|| UnknownCustomId(raw.to_string()))
    }
}
