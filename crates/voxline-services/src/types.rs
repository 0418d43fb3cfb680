use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Immutable copy of the transcript handed to one generation request. The
/// live transcript stays with the context aggregator; adapters never see it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSnapshot {
    pub turns: Vec<ConversationTurn>,
}

impl ContextSnapshot {
    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

/// Incremental transcription output. One utterance yields any number of
/// interim events and exactly one final.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    Interim { text: String },
    Final { text: String },
}

/// Raw synthesized or speech-to-speech audio, mono PCM.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One unit of reply-generator output. Cascaded backends stream `Text`;
/// native speech-to-speech backends stream `Audio`. Every successful
/// generation is terminated by `Done`.
#[derive(Debug, Clone)]
pub enum ReplyChunk {
    Text(String),
    Audio(AudioChunk),
    Done,
}
