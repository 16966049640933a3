//! Model response schema. Classifies untrusted LLM text as exactly one of
//! the two permitted shapes before anything downstream trusts it.
//!
//! ```text
//! {"interests": [..], "mapping": {path: [interest, ..]}, "explanations": {path: ".."}}
//! {"clarify": ".."}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const ADVICE_KEYS: [&str; 3] = ["interests", "mapping", "explanations"];
const CLARIFY_KEY: &str = "clarify";

/// The terminal career-advice artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceResult {
    pub interests: Vec<String>,
    /// Career path → interests that led to it.
    pub mapping: BTreeMap<String, Vec<String>>,
    /// Career path → why it suits the user.
    pub explanations: BTreeMap<String, String>,
}

impl AdviceResult {
    /// Checks the cross-references between the three fields:
    /// `mapping` and `explanations` name the same paths, and every mapped
    /// interest is one of `interests`.
    pub fn validate(&self) -> Result<(), ResponseError> {
        let unexplained: Vec<&str> = self
            .mapping
            .keys()
            .filter(|path| !self.explanations.contains_key(*path))
            .map(String::as_str)
            .collect();
        if !unexplained.is_empty() {
            return Err(ResponseError::Schema(format!(
                "career paths without an explanation: {}",
                unexplained.join(", ")
            )));
        }

        let unmapped: Vec<&str> = self
            .explanations
            .keys()
            .filter(|path| !self.mapping.contains_key(*path))
            .map(String::as_str)
            .collect();
        if !unmapped.is_empty() {
            return Err(ResponseError::Schema(format!(
                "explanations for career paths missing from mapping: {}",
                unmapped.join(", ")
            )));
        }

        let known: BTreeSet<&str> = self.interests.iter().map(String::as_str).collect();
        for (path, matched) in &self.mapping {
            if let Some(stray) = matched.iter().find(|i| !known.contains(i.as_str())) {
                return Err(ResponseError::Schema(format!(
                    "career path '{path}' references interest '{stray}' not listed in interests"
                )));
            }
        }

        Ok(())
    }
}

/// A follow-up question from the model. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub question: String,
}

impl ClarificationRequest {
    pub fn new(question: impl Into<String>) -> Option<Self> {
        let question = question.into();
        if question.trim().is_empty() {
            return None;
        }
        Some(Self { question })
    }
}

/// A validated model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelResponse {
    Advice(AdviceResult),
    Clarify(ClarificationRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("model output is not valid JSON: {0}")]
    Malformed(String),

    #[error("model output does not match the expected schema: {0}")]
    Schema(String),
}

/// What to do with model output that is not JSON at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Fail the session with a malformed-response error.
    #[default]
    Strict,
    /// Treat non-empty plain text as an implicit clarification question.
    Lenient,
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!(
                "unknown malformed-response policy '{other}' (expected 'strict' or 'lenient')"
            )),
        }
    }
}

impl fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Lenient => f.write_str("lenient"),
        }
    }
}

/// Parses and classifies raw model output.
pub fn parse_model_response(
    raw: &str,
    policy: MalformedPolicy,
) -> Result<ModelResponse, ResponseError> {
    let text = strip_json_fences(raw);

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            return match policy {
                MalformedPolicy::Lenient => ClarificationRequest::new(text)
                    .map(ModelResponse::Clarify)
                    .ok_or_else(|| ResponseError::Malformed("empty response".to_string())),
                MalformedPolicy::Strict => Err(ResponseError::Malformed(e.to_string())),
            };
        }
    };

    match value {
        Value::Object(object) => classify(object),
        other => Err(ResponseError::Schema(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn classify(object: Map<String, Value>) -> Result<ModelResponse, ResponseError> {
    let has_clarify = object.contains_key(CLARIFY_KEY);
    let advice_keys: Vec<&str> = ADVICE_KEYS
        .into_iter()
        .filter(|key| object.contains_key(*key))
        .collect();

    if has_clarify && !advice_keys.is_empty() {
        return Err(ResponseError::Schema(
            "response mixes 'clarify' with advice fields".to_string(),
        ));
    }

    if has_clarify {
        return match &object[CLARIFY_KEY] {
            Value::String(question) => ClarificationRequest::new(question.as_str())
                .map(ModelResponse::Clarify)
                .ok_or_else(|| ResponseError::Schema("'clarify' is empty".to_string())),
            other => Err(ResponseError::Schema(format!(
                "'clarify' must be a string, got {}",
                json_type(other)
            ))),
        };
    }

    if advice_keys.len() < ADVICE_KEYS.len() {
        let missing: Vec<&str> = ADVICE_KEYS
            .into_iter()
            .filter(|key| !advice_keys.contains(key))
            .collect();
        return Err(ResponseError::Schema(format!(
            "missing required keys: {}",
            missing.join(", ")
        )));
    }

    let result: AdviceResult = serde_json::from_value(Value::Object(object))
        .map_err(|e| ResponseError::Schema(e.to_string()))?;
    result.validate()?;
    Ok(ModelResponse::Advice(result))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
