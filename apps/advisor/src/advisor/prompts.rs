// Career advisor prompt templates and the prompt builder.
// All text sent to the LLM for the advisor is defined here.

/// Label placed in front of the conversation text in every user prompt.
pub const CONVERSATION_LABEL: &str = "Conversation: ";

/// Fragment that pins the two permitted output shapes.
const OUTPUT_SHAPES: &str = "\
If no clear interests are found, ask a clarifying question.\n\
Respond only in JSON with one of the following structures:\n\
- {\"interests\": [...], \"mapping\": {...}, \"explanations\": {...}}\n\
- {\"clarify\": \"<question>\"}\n\
Every career path in \"mapping\" must also appear in \"explanations\", and every \
interest listed under a career path must appear in \"interests\".\n\
Do NOT use markdown code fences. Do NOT include any text outside the JSON object.";

/// System prompt for open-ended advice: the model chooses the career paths.
pub const ADVISOR_SYSTEM: &str = "You are a career advisor assistant. \
Given a user conversation, perform these steps:\n\
1. Extract user interests and preferences.\n\
2. Map those interests to suitable career paths based on the interests provided.\n\
3. For each recommended path, generate a short explanation why it suits the user.\n";

/// System prompt restricted to a fixed set of career paths.
/// Replace `{career_paths}` before sending.
pub const ADVISOR_SYSTEM_PREDEFINED: &str = "You are a career advisor assistant. \
Given a user conversation, perform these steps:\n\
1. Extract user interests and preferences.\n\
2. Map those interests to predefined career paths: {career_paths}.\n\
3. For each recommended path, generate a short explanation why it suits the user.\n";

/// The pair of messages sent to the LLM for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub user: String,
}

/// Renders the system instruction. An empty `career_paths` leaves the choice of
/// paths to the model.
pub fn system_template(career_paths: &[String]) -> String {
    let steps = if career_paths.is_empty() {
        ADVISOR_SYSTEM.to_string()
    } else {
        ADVISOR_SYSTEM_PREDEFINED.replace("{career_paths}", &career_paths.join(", "))
    };
    format!("{steps}{OUTPUT_SHAPES}")
}

/// Builds the prompts for one turn. The conversation text is embedded verbatim.
pub fn build(system_template: &str, conversation_text: &str) -> Prompts {
    Prompts {
        system: system_template.to_string(),
        user: format!("{CONVERSATION_LABEL}{conversation_text}"),
    }
}
