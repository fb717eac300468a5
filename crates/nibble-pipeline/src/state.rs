//! Per-thread conversation state, invocation input and stage updates

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Image types the identify stage accepts
pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

/// Opaque key under which one conversation is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(Uuid);

impl ThreadId {
    /// Mint a fresh random thread id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ThreadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Everything remembered about one thread between invocations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub image_bytes: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    /// Raw output of the identify stage
    pub food_items_text: Option<String>,
    /// Current nutrition summary; only the fetch stage writes it
    pub analysis_result: Option<String>,
    /// Question supplied with the most recent invocation that ran a stage
    pub pending_question: Option<String>,
    pub follow_up_answer: Option<String>,
    /// Snapshot of the result a follow-up should be answered against
    pub prior_result: Option<String>,
}

impl ConversationState {
    /// Context for a follow-up: the snapshot if present, else the analysis.
    /// Blank text counts as absent.
    pub fn follow_up_context(&self) -> Option<&str> {
        non_blank(self.prior_result.as_deref()).or(non_blank(self.analysis_result.as_deref()))
    }

    /// Shallow-merge an update: set fields overwrite, the rest persist
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            image_bytes,
            mime_type,
            food_items_text,
            analysis_result,
            pending_question,
            follow_up_answer,
            prior_result,
        } = update;

        merge(&mut self.image_bytes, image_bytes);
        merge(&mut self.mime_type, mime_type);
        merge(&mut self.food_items_text, food_items_text);
        merge(&mut self.analysis_result, analysis_result);
        if let Some(question) = pending_question {
            self.pending_question = question;
        }
        merge(&mut self.follow_up_answer, follow_up_answer);
        merge(&mut self.prior_result, prior_result);
    }
}

fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
    if let Some(value) = value {
        *slot = Some(value);
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

/// Partial state produced by a stage. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub image_bytes: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub food_items_text: Option<String>,
    pub analysis_result: Option<String>,
    /// `Some(None)` clears the stored question
    pub pending_question: Option<Option<String>>,
    pub follow_up_answer: Option<String>,
    pub prior_result: Option<String>,
}

/// Arguments of one pipeline invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineInput {
    pub image_bytes: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub user_question: Option<String>,
    pub prior_result: Option<String>,
}

impl PipelineInput {
    /// Input carrying a freshly uploaded image
    pub fn image(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            image_bytes: Some(bytes),
            mime_type: Some(mime_type.into()),
            ..Default::default()
        }
    }

    /// Input carrying a follow-up question
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            user_question: Some(question.into()),
            ..Default::default()
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.user_question = Some(question.into());
        self
    }

    pub fn with_prior_result(mut self, prior: impl Into<String>) -> Self {
        self.prior_result = Some(prior.into());
        self
    }

    /// The question, if one was given and it is not blank
    pub fn user_question(&self) -> Option<&str> {
        self.user_question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// The caller's prior result, if one was given and it is not blank
    pub fn prior_result(&self) -> Option<&str> {
        non_blank(self.prior_result.as_deref())
    }

    /// Whether both image bytes and a mime type were supplied
    pub fn has_image(&self) -> bool {
        self.image_bytes.is_some() && self.mime_type.is_some()
    }

    /// Reject image fields the identify stage cannot use
    pub fn validate(&self) -> Result<()> {
        match (&self.image_bytes, &self.mime_type) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(Error::unsupported("image bytes supplied without a mime type")),
            (None, Some(_)) => Err(Error::unsupported("mime type supplied without image bytes")),
            (Some(bytes), Some(_)) if bytes.is_empty() => {
                Err(Error::unsupported("image bytes are empty"))
            }
            (Some(_), Some(mime)) => {
                if SUPPORTED_MIME_TYPES.contains(&mime.as_str()) {
                    Ok(())
                } else {
                    Err(Error::unsupported(format!("unsupported image type '{}'", mime)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_disjoint_updates_union() {
        let mut state = ConversationState::default();
        state.apply(StateUpdate {
            food_items_text: Some("1 apple".into()),
            ..Default::default()
        });
        state.apply(StateUpdate {
            analysis_result: Some("- apple: 95 kcal".into()),
            ..Default::default()
        });
        assert_eq!(state.food_items_text.as_deref(), Some("1 apple"));
        assert_eq!(state.analysis_result.as_deref(), Some("- apple: 95 kcal"));
    }

    #[test]
    fn test_same_key_last_write_wins_and_others_survive() {
        let mut state = ConversationState {
            mime_type: Some("image/png".into()),
            ..Default::default()
        };
        state.apply(StateUpdate {
            follow_up_answer: Some("first".into()),
            ..Default::default()
        });
        state.apply(StateUpdate {
            follow_up_answer: Some("second".into()),
            ..Default::default()
        });
        assert_eq!(state.follow_up_answer.as_deref(), Some("second"));
        assert_eq!(state.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_pending_question_can_be_cleared() {
        let mut state = ConversationState {
            pending_question: Some("old".into()),
            ..Default::default()
        };
        state.apply(StateUpdate::default());
        assert_eq!(state.pending_question.as_deref(), Some("old"));

        state.apply(StateUpdate {
            pending_question: Some(None),
            ..Default::default()
        });
        assert!(state.pending_question.is_none());
    }

    #[test]
    fn test_follow_up_context_prefers_prior_result() {
        let mut state = ConversationState {
            analysis_result: Some("analysis".into()),
            ..Default::default()
        };
        assert_eq!(state.follow_up_context(), Some("analysis"));
        state.prior_result = Some("prior".into());
        assert_eq!(state.follow_up_context(), Some("prior"));
    }

    #[test]
    fn test_blank_text_is_not_follow_up_context() {
        let mut state = ConversationState {
            prior_result: Some("  ".into()),
            analysis_result: Some("analysis".into()),
            ..Default::default()
        };
        assert_eq!(state.follow_up_context(), Some("analysis"));
        state.analysis_result = Some(String::new());
        assert_eq!(state.follow_up_context(), None);
    }

    #[test]
    fn test_validate_image_inputs() {
        assert!(PipelineInput::default().validate().is_ok());
        assert!(PipelineInput::image(vec![1, 2], "image/jpeg").validate().is_ok());

        let cases = [
            PipelineInput::image(vec![], "image/jpeg"),
            PipelineInput::image(vec![1], "image/gif"),
            PipelineInput {
                image_bytes: Some(vec![1]),
                ..Default::default()
            },
            PipelineInput {
                mime_type: Some("image/png".into()),
                ..Default::default()
            },
        ];
        for input in cases {
            let err = input.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedInput, "{:?}", input);
        }
    }

    #[test]
    fn test_blank_question_is_absent() {
        assert!(PipelineInput::question("   ").user_question().is_none());
        assert_eq!(
            PipelineInput::question(" calories? ").user_question(),
            Some("calories?")
        );
    }

    #[test]
    fn test_thread_id_round_trips_through_string() {
        let id = ThreadId::new();
        let parsed: ThreadId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_ne!(ThreadId::new(), id);
    }
}
