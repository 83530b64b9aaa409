use serde::{Deserialize, Serialize};

/// Turn markers the model emits when it starts simulating another speaker.
pub const STOP_SEQUENCES: [&[u8]; 2] = [b"\nuser: ", b"\nsystem: "];

const ASSISTANT_TAG: &str = "assistant: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Renders messages as `role: content` lines and opens an assistant turn.
pub fn format_chat(messages: &[ChatMessage]) -> String {
    let mut transcript = String::new();
    for message in messages {
        transcript.push_str(message.role.as_str());
        transcript.push_str(": ");
        transcript.push_str(&message.content);
        transcript.push('\n');
    }
    transcript.push_str(ASSISTANT_TAG);
    transcript
}

/// Returns the text of the final assistant turn in a decoded transcript.
///
/// Only a tag at the start of a line opens a turn, so generated text that
/// mentions `assistant: ` mid-line stays part of the reply.
pub fn extract_assistant_reply(decoded: &str) -> String {
    let start = decoded
        .rmatch_indices(ASSISTANT_TAG)
        .map(|(pos, _)| pos)
        .find(|&pos| pos == 0 || decoded.as_bytes()[pos - 1] == b'\n')
        .map_or(0, |pos| pos + ASSISTANT_TAG.len());
    let tail = &decoded[start..];
    let end = ["\nuser: ", "\nsystem: ", "\nassistant: "]
        .iter()
        .filter_map(|marker| tail.find(marker))
        .min()
        .unwrap_or(tail.len());
    tail[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_opens_assistant_turn() {
        let messages = vec![
            ChatMessage::new(Role::System, "be brief"),
            ChatMessage::new(Role::User, "hello"),
        ];
        assert_eq!(format_chat(&messages), "system: be brief\nuser: hello\nassistant: ");
    }

    #[test]
    fn reply_is_last_assistant_turn() {
        let text = "user: hi\nassistant: first\nuser: again\nassistant:  second reply \n";
        assert_eq!(extract_assistant_reply(text), "second reply");
    }

    #[test]
    fn reply_stops_at_next_turn_marker() {
        let text = "user: hi\nassistant: HHH\nuser: more";
        assert_eq!(extract_assistant_reply(text), "HHH");
    }

    #[test]
    fn mid_line_tag_stays_in_reply() {
        let text = "user: who?\nassistant: I am your assistant: ask away";
        assert_eq!(extract_assistant_reply(text), "I am your assistant: ask away");
    }

    #[test]
    fn tag_at_transcript_start_opens_a_turn() {
        assert_eq!(extract_assistant_reply("assistant: hi there"), "hi there");
    }

    #[test]
    fn roles_deserialize_lowercase() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"x"}"#).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert!(serde_json::from_str::<ChatMessage>(r#"{"role":"tool","content":"x"}"#).is_err());
    }
}
