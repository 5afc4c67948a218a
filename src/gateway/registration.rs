use tracing::info;

use crate::discord::types::*;
use crate::discord::{PlatformError, PlatformOps};

fn option(kind: OptionKind, name: &str, description: &str, required: bool) -> CommandOptionSpec {
    CommandOptionSpec {
        kind: kind as u8,
        name: name.to_string(),
        description: description.to_string(),
        required,
        min_value: None,
        max_value: None,
        choices: Vec::new(),
    }
}

fn bounded(mut spec: CommandOptionSpec, min: i64, max: i64) -> CommandOptionSpec {
    spec.min_value = Some(min);
    spec.max_value = Some(max);
    spec
}

fn user(description: &str) -> CommandOptionSpec {
    option(OptionKind::User, "user", description, true)
}

fn reason(description: &str) -> CommandOptionSpec {
    option(OptionKind::String, "reason", description, false)
}

fn command(name: &str, description: &str, options: Vec<CommandOptionSpec>) -> CommandSpec {
    CommandSpec {
        name: name.to_string(),
        description: description.to_string(),
        options,
        default_member_permissions: None,
    }
}

/// Slash commands registered for the guild.
pub fn guild_commands() -> Vec<CommandSpec> {
    let mut role_action = option(OptionKind::String, "action", "Add or remove", true);
    role_action.choices = ["add", "remove"]
        .into_iter()
        .map(|value| CommandChoice {
            name: format!("{}{}", value[..1].to_uppercase(), &value[1..]),
            value: value.to_string(),
        })
        .collect();

    let mut deploy = command("deploytickets", "Post the support ticket panel (Administrator only)", vec![]);
    deploy.default_member_permissions = Some(Permissions::ADMINISTRATOR.bits().to_string());

    vec![
        command("sendpanel", "Send the verification panel (Owner only)", vec![]),
        deploy,
        command(
            "ban",
            "Ban a user from the server",
            vec![
                user("User to ban"),
                reason("Reason for ban"),
                option(OptionKind::Boolean, "delete_messages", "Delete recent messages", false),
            ],
        ),
        command("kick", "Kick a user from the server", vec![user("User to kick"), reason("Reason for kick")]),
        command(
            "timeout",
            "Timeout a user",
            vec![
                user("User to timeout"),
                option(OptionKind::String, "duration", "Duration (e.g., 10m, 1h, 1d)", true),
                reason("Reason for timeout"),
            ],
        ),
        command("untimeout", "Remove timeout from a user", vec![user("User to untimeout")]),
        command("mute", "Server mute a user in voice", vec![user("User to mute"), reason("Reason for mute")]),
        command("unmute", "Unmute a user in voice", vec![user("User to unmute")]),
        command("deafen", "Server deafen a user in voice", vec![user("User to deafen"), reason("Reason for deafen")]),
        command("undeafen", "Undeafen a user in voice", vec![user("User to undeafen")]),
        command(
            "warn",
            "Warn a user",
            vec![
                user("User to warn"),
                option(OptionKind::String, "reason", "Reason for warning", true),
            ],
        ),
        command(
            "clear",
            "Delete recent messages",
            vec![
                bounded(option(OptionKind::Integer, "amount", "Number of messages (1-100)", true), 1, 100),
                option(OptionKind::User, "user", "Only delete messages from this user", false),
            ],
        ),
        command(
            "role",
            "Add or remove a role from a user",
            vec![
                user("User to modify"),
                option(OptionKind::Role, "role", "Role to add/remove", true),
                role_action,
            ],
        ),
        command(
            "slowmode",
            "Set slowmode for the channel",
            vec![bounded(
                option(OptionKind::Integer, "seconds", "Slowmode in seconds (0 to disable)", true),
                0,
                21_600,
            )],
        ),
        command("lock", "Lock the current channel", vec![reason("Reason for locking")]),
        command("unlock", "Unlock the current channel", vec![]),
        command(
            "announce",
            "Send an announcement",
            vec![
                option(OptionKind::String, "title", "Announcement title", true),
                option(OptionKind::String, "message", "Announcement message", true),
                option(OptionKind::Channel, "channel", "Channel to send to", false),
            ],
        ),
        command(
            "nick",
            "Change a user's nickname",
            vec![
                user("User to change nickname"),
                option(OptionKind::String, "nickname", "New nickname (leave empty to reset)", false),
            ],
        ),
        command(
            "userinfo",
            "Get information about a user",
            vec![option(OptionKind::User, "user", "User to get info about", false)],
        ),
        command("serverinfo", "Get information about the server", vec![]),
        command(
            "avatar",
            "Get a user's avatar",
            vec![option(OptionKind::User, "user", "User to get avatar", false)],
        ),
        command("membercount", "Get the server member count", vec![]),
    ]
}

pub async fn register(platform: &dyn PlatformOps, guild: GuildId) -> Result<usize, PlatformError> {
    let commands = guild_commands();
    platform.register_guild_commands(guild, &commands).await?;
    info!(guild = %guild, count = commands.len(), "Slash commands registered");
    Ok(commands.len())
}
