use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// How a response is delivered and framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Ambient,
    MentionReply,
    ContinuationReply,
    Initiation,
}

impl ResponseMode {
    /// Modes framed around one specific message ("respond to this now").
    pub fn targets_message(self) -> bool {
        matches!(self, Self::MentionReply | Self::ContinuationReply)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ambient => "ambient",
            Self::MentionReply => "mention_reply",
            Self::ContinuationReply => "continuation_reply",
            Self::Initiation => "initiation",
        }
    }
}

/// Why the gate decided what it decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    DirectMention,
    ProbabilityDraw,
    LongIdleInitiation,
    Paused,
    NotDrawn,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectMention => "direct_mention",
            Self::ProbabilityDraw => "probability_draw",
            Self::LongIdleInitiation => "long_idle_initiation",
            Self::Paused => "paused",
            Self::NotDrawn => "not_drawn",
        }
    }
}

/// Transient result of evaluating one inbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub should_respond: bool,
    pub mode: ResponseMode,
    pub trigger: TriggerReason,
    /// The respond probability the draw was compared against.
    pub probability: f64,
}

impl GateDecision {
    pub fn silent(trigger: TriggerReason, probability: f64) -> Self {
        Self {
            should_respond: false,
            mode: ResponseMode::Ambient,
            trigger,
            probability,
        }
    }
}

/// Style-repaired text ready for dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub text: String,
    /// When set, dispatch must use the threaded-reply primitive.
    pub reply_target_message_id: Option<MessageId>,
}
