//! Wire and local event vocabulary
//!
//! Every frame exchanged with the backend, and every event fanned out on the
//! local [`Bus`](crate::bus::Bus), is an [`Event`]. The round lifecycle is a
//! closed tagged union ([`RoundEvent`]) discriminated on the JSON `type`
//! field. Anything else is kept as a [`RawEvent`] so it can be forwarded
//! without loss; decoding never fails because of an unknown `type`.

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::{
    leaderboard::LeaderboardRow,
    mcq::{Answer, GeneratedQuestion, PublicMcq},
    round::RoundResults,
};

/// Events that drive the round lifecycle
///
/// Each variant carries the session `code` it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    /// A question was published and the round started
    McqPublished {
        /// Session code
        code: String,
        /// The question without its correct option
        mcq: PublicMcq,
    },
    /// A student answered the active question
    #[serde(rename_all = "camelCase")]
    AnswerSubmitted {
        /// Session code
        code: String,
        /// Nickname of the student
        student: String,
        /// Question being answered
        mcq_id: String,
        /// Chosen option
        option_id: String,
        /// Client timestamp of the answer
        responded_at_ms: u64,
    },
    /// New leaderboard snapshot
    LeaderboardUpdate {
        /// Session code
        code: String,
        /// Top rows, score descending
        top: Vec<LeaderboardRow>,
    },
    /// The round ended
    RoundResults {
        /// Session code
        code: String,
        /// Final tally of the round
        results: RoundResults,
    },
    /// The session is over; no further round events follow
    SessionEnded {
        /// Session code
        code: String,
    },
}

impl RoundEvent {
    /// The kinds handled by [`RoundEvent`], as they appear in `type`
    pub const KINDS: [&'static str; 5] = [
        "mcq_published",
        "answer_submitted",
        "leaderboard_update",
        "round_results",
        "session_ended",
    ];

    /// Session code the event belongs to
    pub fn code(&self) -> &str {
        match self {
            Self::McqPublished { code, .. }
            | Self::AnswerSubmitted { code, .. }
            | Self::LeaderboardUpdate { code, .. }
            | Self::RoundResults { code, .. }
            | Self::SessionEnded { code } => code,
        }
    }

    /// Builds an `answer_submitted` event from a recorded answer
    pub fn answer(code: impl Into<String>, mcq_id: impl Into<String>, answer: Answer) -> Self {
        Self::AnswerSubmitted {
            code: code.into(),
            student: answer.student,
            mcq_id: mcq_id.into(),
            option_id: answer.option_id,
            responded_at_ms: answer.responded_at_ms,
        }
    }
}

/// An event this crate does not interpret
///
/// The `type` tag is kept in `kind` and the rest of the JSON object in
/// `body`, so that serializing it again produces the original frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// The `type` tag
    #[serde(rename = "type")]
    pub kind: String,
    /// Every other field of the frame
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl RawEvent {
    /// Creates an event of the given kind with an empty body
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: Map::new(),
        }
    }

    /// Adds a field to the body
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Interprets the body as `T` when the event is of kind `kind`
    ///
    /// Returns `None` for a different kind or a body that does not fit `T`.
    pub fn view<T: DeserializeOwned>(&self, kind: &str) -> Option<T> {
        if self.kind != kind {
            return None;
        }
        serde_json::from_value(Value::Object(self.body.clone())).ok()
    }
}

/// Anything that can travel on the bus or the socket
#[derive(Debug, Clone, PartialEq, Serialize, derive_more::From)]
#[serde(untagged)]
pub enum Event {
    /// A round lifecycle event
    Round(RoundEvent),
    /// Any other event, forwarded untouched
    Passthrough(RawEvent),
}

/// Reasons an inbound frame cannot be decoded
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The frame is not JSON
    #[error("frame is not valid json: {0}")]
    NotJson(#[source] serde_json::Error),
    /// The frame is not an object with a string `type`
    #[error("frame has no type tag")]
    MissingType,
    /// A known event kind carries an unexpected payload
    #[error("malformed {kind} payload: {source}")]
    Malformed {
        /// The `type` tag of the frame
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

impl Event {
    /// Decodes a text frame
    ///
    /// # Errors
    ///
    /// See [`DecodeError`]. An unknown `type` is not an error.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::NotJson)?;
        Self::from_value(value)
    }

    /// Decodes an already parsed JSON value
    ///
    /// # Errors
    ///
    /// See [`DecodeError`].
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_owned();

        if RoundEvent::KINDS.contains(&kind.as_str()) {
            serde_json::from_value(value)
                .map(Self::Round)
                .map_err(|source| DecodeError::Malformed { kind, source })
        } else {
            serde_json::from_value(value)
                .map(Self::Passthrough)
                .map_err(|source| DecodeError::Malformed { kind, source })
        }
    }

    /// The `type` tag of the event
    pub fn kind(&self) -> &str {
        match self {
            Self::Round(RoundEvent::McqPublished { .. }) => "mcq_published",
            Self::Round(RoundEvent::AnswerSubmitted { .. }) => "answer_submitted",
            Self::Round(RoundEvent::LeaderboardUpdate { .. }) => "leaderboard_update",
            Self::Round(RoundEvent::RoundResults { .. }) => "round_results",
            Self::Round(RoundEvent::SessionEnded { .. }) => "session_ended",
            Self::Passthrough(raw) => &raw.kind,
        }
    }

    /// Converts the event to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }

    /// Builds an outbound `transcript_chunk` frame
    pub fn transcript_chunk(chunk: impl Into<String>, timestamp_ms: u64) -> Self {
        Self::Passthrough(
            RawEvent::new("transcript_chunk")
                .with("chunk", chunk.into())
                .with("timestamp", timestamp_ms),
        )
    }

    /// Builds the `student_name` greeting a student sends after connecting
    pub fn student_name(name: impl Into<String>) -> Self {
        Self::Passthrough(RawEvent::new("student_name").with("name", name.into()))
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// `student_joined` as sent to the lecturer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StudentJoined {
    /// Connection-scoped student identifier
    pub student_id: String,
    /// Nickname, when the student already greeted
    #[serde(default)]
    pub student_name: Option<String>,
}

/// `student_left` as sent to the lecturer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StudentLeft {
    /// Connection-scoped student identifier
    pub student_id: String,
}

/// `question_options`: generated suggestions awaiting the lecturer's pick
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuestionOptions {
    /// Identifier of the transcript chunk the questions came from
    pub chunk_id: String,
    /// Suggested questions
    pub questions: Vec<GeneratedQuestion>,
    /// Excerpt of the transcript
    #[serde(default)]
    pub transcript_chunk: Option<String>,
}

/// `question_selected`: the backend accepted the lecturer's pick
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuestionSelected {
    /// Identifier of the chunk the pick belonged to
    #[serde(default)]
    pub chunk_id: Option<String>,
    /// Human readable status
    #[serde(default)]
    pub message: Option<String>,
}

/// Question body of a `new_question` frame
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewQuestionBody {
    /// Stored question id
    #[serde(default)]
    pub id: Option<String>,
    /// The question text
    #[serde(alias = "questionText")]
    pub question_text: String,
    /// Option texts in order
    #[serde(default)]
    pub options: Vec<String>,
    /// Answer time configured for the session
    #[serde(default, alias = "answerTimeSeconds")]
    pub answer_time_seconds: Option<u64>,
}

/// `new_question`: a question released by the backend itself
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewQuestion {
    /// The released question
    pub question: NewQuestionBody,
    /// Whether the backend released it without a lecturer pick
    #[serde(default)]
    pub auto_released: bool,
}

/// `answer_result`: feedback on a student's answer
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResult {
    /// Question the feedback is about
    #[serde(default)]
    pub question_id: Option<String>,
    /// Whether the answer was correct
    #[serde(default)]
    pub is_correct: Option<bool>,
    /// Text of the correct answer
    pub correct_answer: String,
    /// Explanation of the answer
    #[serde(default)]
    pub explanation: Option<String>,
}

/// `error`: the backend refused something this client sent
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorNotice {
    /// Human readable reason
    pub message: String,
}
