// Career advisor: prompt building, response validation and the
// clarification-loop controller, plus the HTTP surface over them.
// All LLM calls go through llm_client via the LlmCollaborator trait.

pub mod controller;
pub mod handlers;
pub mod prompts;
pub mod schema;
pub mod session;
pub mod store;
