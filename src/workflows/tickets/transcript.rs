use crate::discord::types::ChannelMessage;

/// Placeholder for messages that carry only embeds or attachments.
const NON_TEXT_CONTENT: &str = "[Embed/Attachment]";

/// Renders channel history, as fetched newest-first, into an oldest-first text log.
pub fn render(messages: &[ChannelMessage]) -> String {
    messages
        .iter()
        .rev()
        .map(|message| {
            let content = if message.content.trim().is_empty() {
                NON_TEXT_CONTENT
            } else {
                message.content.as_str()
            };
            format!(
                "[{}] {}: {}",
                message.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                message.author.username,
                content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::types::{MessageId, User, UserId};
    use chrono::{TimeZone, Utc};

    fn message(id: u64, minute: u32, author: &str, content: &str) -> ChannelMessage {
        ChannelMessage {
            id: MessageId(id),
            author: User {
                id: UserId(id * 10),
                username: author.to_string(),
                global_name: None,
                avatar: None,
                bot: false,
            },
            content: content.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            pinned: false,
        }
    }

    #[test]
    fn newest_first_history_renders_oldest_first() {
        let fetched = vec![
            message(3, 2, "carol", "m3"),
            message(2, 1, "bob", "m2"),
            message(1, 0, "alice", "m1"),
        ];
        let rendered = render(&fetched);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[2024-05-01 12:00:00 UTC] alice: m1",
                "[2024-05-01 12:01:00 UTC] bob: m2",
                "[2024-05-01 12:02:00 UTC] carol: m3",
            ]
        );
    }

    #[test]
    fn empty_content_gets_placeholder() {
        let rendered = render(&[message(1, 0, "alice", "  ")]);
        assert!(rendered.ends_with("alice: [Embed/Attachment]"));
    }
}
