//! Verification verdicts produced by the Verify stage.
//!
//! A verifier reply reaches state either as a JSON object (when the model
//! answered with well-formed JSON) or as raw text. [`VerificationPayload`]
//! models both shapes explicitly so the escalation evaluator can match on them.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON Schema every structured verdict must satisfy.
pub const VERIFIER_OUTPUT_SCHEMA: &str = include_str!("../../schemas/verifier_output.schema.json");

/// Literal marker that counts as a pass inside an unstructured reply.
pub const PASS_MARKER: &str = r#""status": "pass""#;

static VERDICT_VALIDATOR: LazyLock<Option<Validator>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(VERIFIER_OUTPUT_SCHEMA).ok()?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .ok()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStatus {
    Pass,
    Fail,
}

/// Structured verifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerifyStatus,
    #[serde(default)]
    pub feedback: String,
}

impl Verdict {
    /// Parse `value` as a verdict.
    ///
    /// Objects satisfying the verifier schema deserialize directly. Any other
    /// object still counts when its `status` is `"pass"` or `"fail"`; a
    /// non-string `feedback` is kept in its JSON form.
    pub fn from_value(value: &Value) -> Option<Self> {
        let schema_valid = VERDICT_VALIDATOR
            .as_ref()
            .is_some_and(|validator| validator.is_valid(value));
        if schema_valid && let Ok(verdict) = serde_json::from_value(value.clone()) {
            return Some(verdict);
        }
        let object = value.as_object()?;
        let status = match object.get("status").and_then(Value::as_str)? {
            "pass" => VerifyStatus::Pass,
            "fail" => VerifyStatus::Fail,
            _ => return None,
        };
        let feedback = match object.get("feedback") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        Some(Self { status, feedback })
    }
}

/// The verification state value, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationPayload {
    Structured(Verdict),
    Unstructured { raw: String },
}

impl VerificationPayload {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(raw) => Self::from_text(raw),
            other => match Verdict::from_value(other) {
                Some(verdict) => VerificationPayload::Structured(verdict),
                None => VerificationPayload::Unstructured {
                    raw: other.to_string(),
                },
            },
        }
    }

    /// Classify a raw reply. JSON-looking text is parsed before falling back to raw.
    pub fn from_text(raw: &str) -> Self {
        if let Some(value) = parse_json_object(raw)
            && let Some(verdict) = Verdict::from_value(&value)
        {
            return VerificationPayload::Structured(verdict);
        }
        VerificationPayload::Unstructured {
            raw: raw.to_string(),
        }
    }

    pub fn is_pass(&self) -> bool {
        match self {
            VerificationPayload::Structured(verdict) => verdict.status == VerifyStatus::Pass,
            // TODO: anchor the marker to a top-level status field; a substring match also
            // accepts text like `not "status": "pass"`.
            VerificationPayload::Unstructured { raw } => raw.contains(PASS_MARKER),
        }
    }

    pub fn feedback(&self) -> &str {
        match self {
            VerificationPayload::Structured(verdict) => &verdict.feedback,
            VerificationPayload::Unstructured { raw } => raw,
        }
    }
}

/// Convert a verifier reply into the value stored in state.
///
/// JSON objects (optionally wrapped in a Markdown code fence) are stored as
/// objects; anything else is stored as the raw string.
pub fn state_value_from_reply(reply: &str) -> Value {
    match parse_json_object(reply) {
        Some(value) => value,
        None => Value::String(reply.to_string()),
    }
}

fn parse_json_object(text: &str) -> Option<Value> {
    let body = strip_code_fence(text.trim());
    if !body.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}
