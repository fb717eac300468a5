//! Model registry for the Gemini models the assistant can run on.

use crate::{InputType, Model};

/// Model used when nothing else is configured.
pub const DEFAULT_MODEL_ID: &str = "gemini-2.5-flash";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

struct ModelEntry {
    id: &'static str,
    name: &'static str,
    context_window: u32,
    max_tokens: u32,
}

const MODEL_ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        id: "gemini-2.5-flash",
        name: "Gemini 2.5 Flash",
        context_window: 1_048_576,
        max_tokens: 65_536,
    },
    ModelEntry {
        id: "gemini-2.5-pro",
        name: "Gemini 2.5 Pro",
        context_window: 1_048_576,
        max_tokens: 65_536,
    },
    ModelEntry {
        id: "gemini-2.0-flash",
        name: "Gemini 2.0 Flash",
        context_window: 1_048_576,
        max_tokens: 8_192,
    },
];

impl ModelEntry {
    fn to_model(&self) -> Model {
        Model {
            id: self.id.to_string(),
            name: self.name.to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            input_types: vec![InputType::Text, InputType::Image],
            context_window: self.context_window,
            max_tokens: self.max_tokens,
            headers: Default::default(),
        }
    }
}

/// Look up a model by ID.
pub fn get_model(id: &str) -> Option<Model> {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id)
        .map(|e| e.to_model())
}

/// Look up a model by ID, falling back to a generic Gemini entry for unknown IDs.
pub fn get_model_or_custom(id: &str) -> Model {
    get_model(id).unwrap_or_else(|| Model {
        id: id.to_string(),
        name: id.to_string(),
        base_url: GEMINI_BASE_URL.to_string(),
        input_types: vec![InputType::Text, InputType::Image],
        context_window: 128_000,
        max_tokens: 8_192,
        headers: Default::default(),
    })
}

/// The default model.
pub fn default_model() -> Model {
    get_model_or_custom(DEFAULT_MODEL_ID)
}
