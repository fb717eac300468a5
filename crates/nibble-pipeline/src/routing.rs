//! Stage selection. Pure functions over state and input.

use serde::{Deserialize, Serialize};

use crate::state::{ConversationState, PipelineInput};

/// A unit of work in the pipeline, or the terminal marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Identify,
    FetchNutrition,
    AnswerFollowUp,
    Done,
}

/// Pick the first stage of an invocation.
///
/// A question with an explicit prior result wins over a new image, so a
/// follow-up never re-runs the analysis. Stored context only counts when the
/// input carries no image: a new photo is always analysed. A bare question
/// still goes to the follow-up stage, which answers with the sentinel when
/// there is nothing to go on.
pub fn route_entry(state: &ConversationState, input: &PipelineInput) -> Stage {
    let question = input.user_question().is_some();
    let prior_context = input.prior_result().is_some()
        || (!input.has_image() && state.follow_up_context().is_some());

    if question && prior_context {
        Stage::AnswerFollowUp
    } else if input.has_image() {
        Stage::Identify
    } else if question {
        Stage::AnswerFollowUp
    } else {
        Stage::Done
    }
}

/// Decide whether a fresh analysis flows straight into a follow-up answer
pub fn route_after_nutrition(input: &PipelineInput, chain_follow_up: bool) -> Stage {
    if chain_follow_up && input.user_question().is_some() {
        Stage::AnswerFollowUp
    } else {
        Stage::Done
    }
}

/// Stage that follows `current` in this invocation
pub fn next_stage(current: Stage, input: &PipelineInput, chain_follow_up: bool) -> Stage {
    match current {
        Stage::Identify => Stage::FetchNutrition,
        Stage::FetchNutrition => route_after_nutrition(input, chain_follow_up),
        Stage::AnswerFollowUp | Stage::Done => Stage::Done,
    }
}
