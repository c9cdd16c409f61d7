pub mod llm;
pub mod user;
