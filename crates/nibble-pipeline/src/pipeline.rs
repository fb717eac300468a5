//! Runs stages for one thread and persists their output

use std::sync::Arc;

use nibble_agent::{AgentEvent, DEFAULT_MAX_TURNS, Transport};
use nibble_ai::Model;
use tokio::sync::broadcast;

use crate::{
    error::Result,
    routing::{Stage, next_stage, route_entry},
    stages::{self, StageEnv},
    state::{ConversationState, PipelineInput, StateUpdate, ThreadId},
    store::StateStore,
    tools::{EncyclopediaSource, NutritionSource},
};

/// External services the stages call
#[derive(Clone)]
pub struct Services {
    /// Model access for all three stages
    pub transport: Arc<dyn Transport>,
    pub model: Model,
    pub nutrition: Arc<dyn NutritionSource>,
    /// Offered to the follow-up loop when present
    pub encyclopedia: Option<Arc<dyn EncyclopediaSource>>,
}

/// Pipeline behaviour knobs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model calls allowed per reasoning loop
    pub max_turns: u32,
    /// Answer a question supplied alongside an image in the same invocation
    pub chain_follow_up: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            chain_follow_up: true,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Stages that ran, in order
    pub stages: Vec<Stage>,
    /// Thread state after the invocation
    pub state: ConversationState,
}

pub struct Pipeline {
    services: Services,
    config: PipelineConfig,
    store: Arc<StateStore>,
    event_tx: broadcast::Sender<AgentEvent>,
}

impl Pipeline {
    pub fn new(services: Services, config: PipelineConfig, store: Arc<StateStore>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            services,
            config,
            store,
            event_tx,
        }
    }

    /// Subscribe to reasoning-loop events from every stage
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Route and run stages for `thread`, then persist the merged state.
    ///
    /// The thread stays locked for the whole call. State is written back
    /// only when every stage succeeded.
    pub async fn invoke(&self, thread: &ThreadId, input: PipelineInput) -> Result<Invocation> {
        input.validate()?;

        let mut guard = self.store.lock(thread).await;
        let mut stage = route_entry(&guard, &input);
        tracing::debug!(%thread, ?stage, "entry route");

        if stage == Stage::Done {
            return Ok(Invocation {
                stages: vec![],
                state: guard.clone(),
            });
        }

        let mut working = guard.clone();
        working.apply(input_update(&input, stage));

        let env = StageEnv {
            services: &self.services,
            config: &self.config,
            events: &self.event_tx,
        };
        let mut stages = Vec::new();

        while stage != Stage::Done {
            stages.push(stage);
            let update = match stage {
                Stage::Identify => {
                    let bytes = working.image_bytes.clone().unwrap_or_default();
                    let mime = working.mime_type.clone().unwrap_or_default();
                    stages::identify_foods(&env, &bytes, &mime).await?
                }
                Stage::FetchNutrition => {
                    let food_items = working.food_items_text.clone().unwrap_or_default();
                    stages::fetch_nutrition(&env, &food_items).await?
                }
                Stage::AnswerFollowUp => {
                    let context = working.follow_up_context().map(str::to_string);
                    stages::answer_follow_up(&env, input.user_question(), context.as_deref())
                        .await?
                }
                Stage::Done => StateUpdate::default(),
            };
            working.apply(update);

            let next = next_stage(stage, &input, self.config.chain_follow_up);
            tracing::debug!(%thread, from = ?stage, to = ?next, "stage complete");
            stage = next;
        }

        *guard = working;
        tracing::info!(%thread, ?stages, "invocation complete");

        Ok(Invocation {
            stages,
            state: guard.clone(),
        })
    }
}

/// Fields of the input that are persisted once an invocation runs a stage
fn input_update(input: &PipelineInput, entry: Stage) -> StateUpdate {
    let mut update = StateUpdate {
        pending_question: Some(input.user_question().map(str::to_string)),
        prior_result: input.prior_result().map(str::to_string),
        ..Default::default()
    };
    if entry == Stage::Identify {
        update.image_bytes = input.image_bytes.clone();
        update.mime_type = input.mime_type.clone();
    }
    update
}
