//! Tools available to the reasoning loops

mod nutritionix;
mod wikipedia;

pub use nutritionix::{
    NUTRITIONIX_ENDPOINT, NutritionOutcome, NutritionSource, NutritionTool, NutritionixClient,
    outcome_from,
};
pub use wikipedia::{
    EncyclopediaSource, EncyclopediaTool, WIKIPEDIA_SUMMARY_ENDPOINT, WikipediaClient,
};
