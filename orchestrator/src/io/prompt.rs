//! Prompt builder for stage invocations.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::state::State;
use crate::core::types::StageKind;

const PARSE_TEMPLATE: &str = include_str!("prompts/parse.md");
const ANALYZE_TEMPLATE: &str = include_str!("prompts/analyze.md");
const BUILD_TEMPLATE: &str = include_str!("prompts/build.md");
const VERIFY_TEMPLATE: &str = include_str!("prompts/verify.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex should compile")
});

/// Text rendered in place of a state key an earlier stage failed to write.
pub fn unavailable_marker(key: &str) -> String {
    format!("[{key} unavailable: the stage responsible for it did not produce output]")
}

/// Everything a stage prompt can draw on.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub instructions: &'a str,
    /// Joined text of the user message (Parse only).
    pub request: Option<&'a str>,
    /// Human-readable attachment labels (Parse only).
    pub attachments: &'a [String],
    pub state: &'a State,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        for kind in StageKind::ALL {
            env.add_template(kind.as_str(), template_for(kind))
                .with_context(|| format!("load {kind} template"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, kind: StageKind, input: &PromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template(kind.as_str())?;
        let value = |key: &str| -> String {
            match input.state.get(key) {
                Some(serde_json::Value::String(text)) if !text.trim().is_empty() => {
                    text.trim().to_string()
                }
                Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
                    unavailable_marker(key)
                }
                Some(other) => other.to_string(),
            }
        };
        let rendered = template.render(context! {
            instructions => input.instructions.trim(),
            request => input.request.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("(no text provided)"),
            attachments => (!input.attachments.is_empty()).then(|| input.attachments.join(", ")),
            architecture_summary => value("architecture_summary"),
            raw_threat_model => value("raw_threat_model"),
            threat_model_report_content => value("threat_model_report_content"),
        })?;
        Ok(rendered)
    }
}

fn template_for(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Parse => PARSE_TEMPLATE,
        StageKind::Analyze => ANALYZE_TEMPLATE,
        StageKind::Build => BUILD_TEMPLATE,
        StageKind::Verify => VERIFY_TEMPLATE,
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
                whole.start(),
                whole.end(),
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (key, required, _, start)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|(_, _, next_start, _)| *next_start)
            .unwrap_or(rendered.len());
        let content = rendered[*start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections (last first), then truncate the longest section.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    while total_len(sections) > budget {
        let Some(idx) = sections.iter().rposition(|s| !s.required) else {
            break;
        };
        debug!(
            section = sections[idx].key,
            bytes_dropped = sections[idx].content.len(),
            "dropped section for budget"
        );
        sections.remove(idx);
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(longest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let before_len = longest.content.len();
    let allowed = before_len.saturating_sub(total - budget);
    let notice = "\n[truncated]";
    let mut cut = allowed.saturating_sub(notice.len());
    while !longest.content.is_char_boundary(cut) {
        cut -= 1;
    }
    longest.content.truncate(cut);
    if allowed > notice.len() {
        longest.content.push_str(notice);
    }
    debug!(
        section = longest.key,
        before_len,
        after_len = longest.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds stage prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, kind: StageKind, input: &PromptInputs<'_>) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render(kind, input)
            .with_context(|| format!("render {kind} prompt"))?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}
