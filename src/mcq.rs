//! Multiple choice questions
//!
//! This module defines the question shapes that travel through a round: the
//! lecturer-side [`Mcq`] that knows its correct option, the [`PublicMcq`]
//! broadcast to students once a round starts, and the [`Answer`] a student
//! submits. It also converts questions produced by the backend generator
//! into [`Mcq`] values.

use std::collections::HashSet;

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;

/// A single selectable option of a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct McqOption {
    /// Identifier of the option, unique within its question (e.g. `"a"`)
    #[garde(length(min = 1))]
    pub id: String,
    /// Text shown to students
    #[garde(length(max = crate::constants::mcq::MAX_OPTION_LENGTH))]
    pub text: String,
}

impl McqOption {
    /// Creates an option from its identifier and display text
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A multiple choice question as held by the lecturer
///
/// The correct option is only known on the lecturer side; students receive
/// a [`PublicMcq`] instead. A question is never mutated once created.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Mcq {
    /// Identifier of the question
    #[serde(rename = "mcqId", alias = "id")]
    #[garde(length(min = 1))]
    pub id: String,
    /// The question text
    #[serde(alias = "questionText")]
    #[garde(length(min = 1, max = crate::constants::mcq::MAX_QUESTION_LENGTH))]
    pub question: String,
    /// Options in display order
    #[garde(
        length(min = crate::constants::mcq::MIN_OPTION_COUNT, max = crate::constants::mcq::MAX_OPTION_COUNT),
        dive
    )]
    pub options: Vec<McqOption>,
    /// Identifier of the correct option
    #[garde(length(min = 1))]
    pub correct_option_id: String,
    /// Optional explanation revealed after the round
    #[garde(skip)]
    pub explanation: Option<String>,
}

/// The student view of a published question
///
/// `deadline_ms` is fixed when the question is published and equals the
/// publication time plus `round_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicMcq {
    /// Identifier of the question
    #[serde(rename = "mcqId", alias = "id")]
    pub id: String,
    /// The question text
    #[serde(alias = "questionText")]
    pub question: String,
    /// Options in display order
    pub options: Vec<McqOption>,
    /// Epoch milliseconds after which answers are no longer accepted
    pub deadline_ms: u64,
    /// Round duration in milliseconds, used for progress rendering
    pub round_ms: u64,
}

/// A student's answer to the active question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Nickname of the student
    pub student: String,
    /// Identifier of the chosen option
    pub option_id: String,
    /// Client timestamp (epoch milliseconds) of the answer
    pub responded_at_ms: u64,
}

/// Errors that make a question unusable for a round
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A field is out of its allowed bounds
    #[error("invalid question: {0}")]
    Invalid(String),
    /// Two options share the same identifier
    #[error("duplicate option id {0:?}")]
    DuplicateOption(String),
    /// The correct option is not one of the declared options
    #[error("correct option {0:?} is not among the options")]
    UnknownCorrectOption(String),
}

impl Mcq {
    /// Checks field bounds and the cross-field rules of a question
    ///
    /// # Errors
    ///
    /// * `Error::Invalid` - a field violates its length bounds
    /// * `Error::DuplicateOption` - two options share an id
    /// * `Error::UnknownCorrectOption` - the correct id names no option
    pub fn check(&self) -> Result<(), Error> {
        self.validate()
            .map_err(|report| Error::Invalid(report.to_string()))?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = self.options.iter().find(|o| !seen.insert(o.id.as_str())) {
            return Err(Error::DuplicateOption(duplicate.id.clone()));
        }

        if !self.has_option(&self.correct_option_id) {
            return Err(Error::UnknownCorrectOption(self.correct_option_id.clone()));
        }

        Ok(())
    }

    /// Returns whether `option_id` is one of the declared options
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }

    /// Returns whether `option_id` is the correct option
    pub fn is_correct(&self, option_id: &str) -> bool {
        self.correct_option_id == option_id
    }

    /// Strips the correct option and stamps the round timing
    pub fn publish(&self, published_at_ms: u64, round_ms: u64) -> PublicMcq {
        PublicMcq {
            id: self.id.clone(),
            question: self.question.clone(),
            options: self.options.clone(),
            deadline_ms: published_at_ms + round_ms,
            round_ms,
        }
    }

    /// Converts a backend-generated question into a lecturer question
    ///
    /// At most four options are kept and labelled `a` to `d`. The correct
    /// option is the one whose text equals the generated correct answer,
    /// falling back to the first option when nothing matches.
    pub fn from_generated(generated: &GeneratedQuestion) -> Self {
        const LETTERS: [&str; crate::constants::mcq::MAX_GENERATED_OPTIONS] = ["a", "b", "c", "d"];

        let options = generated
            .options
            .iter()
            .take(crate::constants::mcq::MAX_GENERATED_OPTIONS)
            .zip(LETTERS)
            .map(|(text, id)| McqOption::new(id, text.as_str()))
            .collect_vec();

        let correct_option_id = options
            .iter()
            .find(|o| o.text == generated.correct_answer)
            .or(options.first())
            .map_or_else(|| LETTERS[0].to_owned(), |o| o.id.clone());

        Self {
            id: generated
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            question: generated.question_text.clone(),
            options,
            correct_option_id,
            explanation: generated.explanation.clone(),
        }
    }
}

impl PublicMcq {
    /// Returns whether `option_id` is one of the declared options
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// A question as produced by the backend generator
///
/// Accepts both the websocket shape (`question_text`, `correct_answer`) and
/// the stored shape (`questionText`, `correctAnswer`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    /// Position among the suggestions offered to the lecturer
    #[serde(default)]
    pub index: Option<usize>,
    /// Stored question id, when the backend already persisted it
    #[serde(default)]
    pub id: Option<String>,
    /// The question text
    #[serde(alias = "questionText")]
    pub question_text: String,
    /// Option texts in order
    pub options: Vec<String>,
    /// Text of the correct option
    #[serde(alias = "correctAnswer")]
    pub correct_answer: String,
    /// Optional explanation
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Hard-coded drafts used by offline demo sessions
pub fn sample_drafts() -> Vec<Mcq> {
    vec![Mcq {
        id: "m1".to_owned(),
        question: "Which GCP service runs containers without servers?".to_owned(),
        options: vec![
            McqOption::new("a", "Cloud Run"),
            McqOption::new("b", "Compute Engine"),
            McqOption::new("c", "Bare metal"),
            McqOption::new("d", "Filestore"),
        ],
        correct_option_id: "a".to_owned(),
        explanation: None,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(options: &[&str], correct: &str) -> GeneratedQuestion {
        GeneratedQuestion {
            index: Some(0),
            id: None,
            question_text: "What is ownership?".to_owned(),
            options: options.iter().map(|s| (*s).to_owned()).collect(),
            correct_answer: correct.to_owned(),
            explanation: None,
        }
    }

    #[test]
    fn test_sample_draft_is_valid() {
        for mcq in sample_drafts() {
            assert_eq!(mcq.check(), Ok(()));
        }
    }

    #[test]
    fn test_check_rejects_too_few_options() {
        let mut mcq = sample_drafts().remove(0);
        mcq.options.truncate(1);
        mcq.correct_option_id = "a".to_owned();
        assert!(matches!(mcq.check(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_check_rejects_too_many_options() {
        let mut mcq = sample_drafts().remove(0);
        mcq.options = (0..7)
            .map(|i| McqOption::new(i.to_string(), "x"))
            .collect();
        mcq.correct_option_id = "0".to_owned();
        assert!(matches!(mcq.check(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_check_rejects_duplicate_options() {
        let mut mcq = sample_drafts().remove(0);
        mcq.options[1].id = "a".to_owned();
        assert_eq!(mcq.check(), Err(Error::DuplicateOption("a".to_owned())));
    }

    #[test]
    fn test_check_rejects_unknown_correct_option() {
        let mut mcq = sample_drafts().remove(0);
        mcq.correct_option_id = "z".to_owned();
        assert_eq!(
            mcq.check(),
            Err(Error::UnknownCorrectOption("z".to_owned()))
        );
    }

    #[test]
    fn test_publish_fixes_deadline() {
        let mcq = sample_drafts().remove(0);
        let public = mcq.publish(1_000, 15_000);

        assert_eq!(public.deadline_ms, 16_000);
        assert_eq!(public.round_ms, 15_000);
        assert_eq!(public.options, mcq.options);
    }

    #[test]
    fn test_public_mcq_hides_correct_option() {
        let public = sample_drafts().remove(0).publish(0, 15_000);
        let json = serde_json::to_value(&public).unwrap();

        assert!(json.get("correctOptionId").is_none());
        assert_eq!(json["mcqId"], "m1");
        assert_eq!(json["deadlineMs"], 15_000);
    }

    #[test]
    fn test_mcq_accepts_stored_field_names() {
        let mcq: Mcq = serde_json::from_value(serde_json::json!({
            "id": "q7",
            "questionText": "2 + 2?",
            "options": [{"id": "a", "text": "4"}, {"id": "b", "text": "5"}],
            "correctOptionId": "a",
        }))
        .unwrap();

        assert_eq!(mcq.id, "q7");
        assert_eq!(mcq.question, "2 + 2?");
        assert!(mcq.explanation.is_none());
    }

    #[test]
    fn test_from_generated_matches_correct_text() {
        let mcq = Mcq::from_generated(&generated(&["Borrow", "Move", "Copy"], "Move"));

        assert_eq!(mcq.correct_option_id, "b");
        assert_eq!(
            mcq.options.iter().map(|o| o.id.as_str()).collect_vec(),
            ["a", "b", "c"]
        );
        assert!(!mcq.id.is_empty());
    }

    #[test]
    fn test_from_generated_falls_back_to_first_option() {
        let mcq = Mcq::from_generated(&generated(&["Borrow", "Move"], "Clone"));
        assert_eq!(mcq.correct_option_id, "a");
    }

    #[test]
    fn test_from_generated_keeps_four_options() {
        let mcq = Mcq::from_generated(&generated(&["1", "2", "3", "4", "5"], "5"));

        assert_eq!(mcq.options.len(), 4);
        assert_eq!(mcq.correct_option_id, "a");
    }

    #[test]
    fn test_generated_question_accepts_stored_shape() {
        let generated: GeneratedQuestion = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "questionText": "Q?",
            "options": ["x", "y"],
            "correctAnswer": "y",
        }))
        .unwrap();
        let mcq = Mcq::from_generated(&generated);

        assert_eq!(mcq.id, "abc");
        assert_eq!(mcq.correct_option_id, "b");
    }
}
