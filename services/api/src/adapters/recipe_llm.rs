//! services/api/src/adapters/recipe_llm.rs
//!
//! This module contains the adapter for the recipe-writing LLM.
//! It implements the `RecipeSynthesisService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a recipe writer for a grocery service. You receive a list of products that customers often buy together. Propose ONE simple home recipe that uses most of them.

Reply in exactly this format and nothing else:
NAME: <a short recipe name, at most 8 words>
DESCRIPTION: <one or two sentences describing the dish and how the products are used>

IMPORTANT: If the products cannot sensibly be combined into a dish (for example, they are cleaning supplies, toiletries or other non-food items), respond with EXACTLY: 'SKIP_RECIPE' and nothing else."#;

const SKIP_SENTINEL: &str = "SKIP_RECIPE";

use async_openai::{
    config::OpenAIConfig,
    types::responses::CreateResponseArgs,
    Client, error::OpenAIError,
};
use async_trait::async_trait;
use homecare_core::{
    domain::{RecipeIngredient, SynthesizedRecipe},
    ports::{PortError, PortResult, RecipeSynthesisService},
};
use tracing::{debug, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `RecipeSynthesisService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiRecipeAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiRecipeAdapter {
    /// Creates a new `OpenAiRecipeAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Reads the model's reply. `Ok(None)` means the model declined.
pub fn parse_recipe_reply(raw: &str) -> PortResult<Option<SynthesizedRecipe>> {
    let trimmed = raw.trim().trim_matches('\'');
    if trimmed.eq_ignore_ascii_case(SKIP_SENTINEL) {
        return Ok(None);
    }

    let field = |label: &str| {
        trimmed.lines().find_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(label)
                .then(|| value.trim().to_string())
        })
    };

    match field("NAME").filter(|name| !name.is_empty()) {
        Some(name) => Ok(Some(SynthesizedRecipe {
            name,
            description: field("DESCRIPTION").unwrap_or_default(),
        })),
        None => Err(PortError::Unexpected(
            "Recipe LLM reply did not contain a NAME line.".to_string(),
        )),
    }
}

//=========================================================================================
// `RecipeSynthesisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl RecipeSynthesisService for OpenAiRecipeAdapter {
    async fn synthesize_recipe(
        &self,
        ingredients: &[RecipeIngredient],
    ) -> PortResult<Option<SynthesizedRecipe>> {
        let product_list = ingredients
            .iter()
            .map(|i| format!("- {}", i.name))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CreateResponseArgs::default()
            .model(&self.model)
            .instructions(SYSTEM_INSTRUCTIONS)
            .input(format!("PRODUCTS:\n{}", product_list))
            .max_output_tokens(300u32)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .responses()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let raw = response.output_text().unwrap_or_default();
        debug!(products = ingredients.len(), "Recipe LLM replied.");

        // A malformed reply counts as a decline so one bad answer does not
        // fail the whole run.
        match parse_recipe_reply(&raw) {
            Ok(recipe) => Ok(recipe),
            Err(e) => {
                warn!(error = %e, "Discarding malformed recipe reply.");
                Ok(None)
            }
        }
    }
}
