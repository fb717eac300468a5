//! The three pipeline stages

use std::sync::Arc;

use nibble_agent::{Agent, AgentConfig, AgentEvent, BoxedTool};
use nibble_ai::Content;
use tokio::sync::broadcast;

use crate::{
    error::{Error, Result},
    pipeline::{PipelineConfig, Services},
    prompts,
    state::StateUpdate,
    tools::{EncyclopediaTool, NutritionTool},
};

/// What a stage needs from the pipeline that runs it
pub(crate) struct StageEnv<'a> {
    pub services: &'a Services,
    pub config: &'a PipelineConfig,
    pub events: &'a broadcast::Sender<AgentEvent>,
}

impl StageEnv<'_> {
    fn agent(&self, name: &str, system_prompt: Option<&str>, tools: Vec<BoxedTool>) -> Agent {
        let config = AgentConfig {
            name: name.to_string(),
            system_prompt: system_prompt.map(str::to_string),
            model: self.services.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            max_turns: self.config.max_turns,
        };
        let mut agent = Agent::new(config, Arc::clone(&self.services.transport))
            .with_event_sender(self.events.clone());
        agent.set_tools(tools);
        agent
    }
}

/// Describe the food in an image
pub(crate) async fn identify_foods(
    env: &StageEnv<'_>,
    image_bytes: &[u8],
    mime_type: &str,
) -> Result<StateUpdate> {
    let model = &env.services.model;
    if !model.supports_images() {
        return Err(Error::unsupported(format!(
            "model '{}' does not accept image input",
            model.id
        )));
    }

    let mut agent = env.agent("identify", None, vec![]);
    agent
        .prompt_with_content(vec![
            Content::image_bytes(image_bytes, mime_type),
            Content::text(prompts::IDENTIFY_INSTRUCTION),
        ])
        .await?;

    Ok(StateUpdate {
        food_items_text: Some(agent.final_text().unwrap_or_default()),
        ..Default::default()
    })
}

/// Look up and total the nutrition of the identified foods
pub(crate) async fn fetch_nutrition(env: &StageEnv<'_>, food_items: &str) -> Result<StateUpdate> {
    let tools: Vec<BoxedTool> = vec![Arc::new(NutritionTool::new(Arc::clone(
        &env.services.nutrition,
    )))];
    let mut agent = env.agent("nutrition", Some(prompts::NUTRITION_SYSTEM_PROMPT), tools);
    agent.prompt(&prompts::nutrition_request(food_items)).await?;

    let analysis = agent.final_text().unwrap_or_default();
    Ok(StateUpdate {
        analysis_result: Some(analysis.clone()),
        prior_result: Some(analysis),
        ..Default::default()
    })
}

/// Answer a follow-up question against the best available context
pub(crate) async fn answer_follow_up(
    env: &StageEnv<'_>,
    question: Option<&str>,
    context: Option<&str>,
) -> Result<StateUpdate> {
    let answer = match (question, context) {
        (None, context) => context.unwrap_or(prompts::NO_RESULT_YET).to_string(),
        (Some(_), None) => {
            tracing::debug!("no analysis to answer against, using sentinel");
            prompts::NO_RESULT_YET.to_string()
        }
        (Some(question), Some(context)) => {
            let tools: Vec<BoxedTool> = env
                .services
                .encyclopedia
                .iter()
                .map(|source| Arc::new(EncyclopediaTool::new(Arc::clone(source))) as BoxedTool)
                .collect();
            let mut agent = env.agent("follow_up", Some(prompts::FOLLOW_UP_SYSTEM_PROMPT), tools);
            agent
                .prompt(&prompts::follow_up_request(context, question))
                .await?;
            agent.final_text().unwrap_or_default()
        }
    };

    Ok(StateUpdate {
        follow_up_answer: Some(answer),
        ..Default::default()
    })
}
