pub mod db;
pub mod recipe_llm;

pub use db::DbAdapter;
pub use recipe_llm::OpenAiRecipeAdapter;
