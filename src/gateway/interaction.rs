use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::discord::types::*;
use crate::workflows::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum InteractionKind {
    Ping,
    ApplicationCommand,
    MessageComponent,
    Autocomplete,
    ModalSubmit,
}

impl InteractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ApplicationCommand => "command",
            Self::MessageComponent => "component",
            Self::Autocomplete => "autocomplete",
            Self::ModalSubmit => "modal_submit",
        }
    }
}

impl TryFrom<u8> for InteractionKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Ping),
            2 => Ok(Self::ApplicationCommand),
            3 => Ok(Self::MessageComponent),
            4 => Ok(Self::Autocomplete),
            5 => Ok(Self::ModalSubmit),
            other => Err(format!("unknown interaction type {other}")),
        }
    }
}

/// Inbound interaction as delivered to the HTTP endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: InteractionId,
    pub application_id: ApplicationId,
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    /// Present for guild interactions.
    #[serde(default)]
    pub member: Option<Member>,
    /// Present for direct-message interactions.
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub data: Option<InteractionData>,
    /// Message carrying the activated control.
    #[serde(default)]
    pub message: Option<SourceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
}

/// Union of command, component and modal data; unused fields stay empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub resolved: Resolved,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub components: Vec<SubmittedRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resolved {
    #[serde(default)]
    pub users: HashMap<String, User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedRow {
    #[serde(default)]
    pub components: Vec<SubmittedInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedInput {
    pub custom_id: String,
    #[serde(default)]
    pub value: String,
}

impl Interaction {
    /// The invoking member or user, with roles and permissions when in a guild.
    pub fn actor(&self) -> Option<Actor> {
        if let Some(member) = &self.member {
            let user = member.user.as_ref()?;
            return Some(
                Actor::new(user.id, user.username.clone())
                    .with_roles(member.roles.clone())
                    .with_permissions(member.permissions.unwrap_or_default()),
            );
        }
        self.user
            .as_ref()
            .map(|user| Actor::new(user.id, user.username.clone()))
    }

    pub fn custom_id(&self) -> Option<&str> {
        self.data.as_ref()?.custom_id.as_deref()
    }

    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref()?.name.as_deref()
    }
}

impl InteractionData {
    /// Value typed into a modal text input.
    pub fn text_input(&self, custom_id: &str) -> Option<&str> {
        self.components
            .iter()
            .flat_map(|row| row.components.iter())
            .find(|input| input.custom_id == custom_id)
            .map(|input| input.value.as_str())
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options
            .iter()
            .find(|option| option.name == name)
            .and_then(|option| option.value.as_ref())
    }

    pub fn string_option(&self, name: &str) -> Option<String> {
        self.option(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn integer_option(&self, name: &str) -> Option<i64> {
        self.option(name).and_then(Value::as_i64)
    }

    pub fn bool_option(&self, name: &str) -> Option<bool> {
        self.option(name).and_then(Value::as_bool)
    }

    /// Snowflake options arrive as strings.
    pub fn snowflake_option(&self, name: &str) -> Option<u64> {
        match self.option(name)? {
            Value::String(raw) => raw.parse().ok(),
            Value::Number(number) => number.as_u64(),
            _ => None,
        }
    }

    pub fn resolved_user(&self, id: UserId) -> Option<&User> {
        self.resolved.users.get(&id.to_string())
    }
}
