//! JSON extraction from model output.
//!
//! Models wrap JSON in code fences, add commentary around it, leave raw
//! newlines inside string values or emit trailing commas. Each repair is a
//! pure strategy function; [`JsonPostProcessor`] tries them in order and
//! returns the first value that parses.
//!
//! # Example
//!
//! ```
//! use llm_orchestrator::postprocess::{JsonPostProcessor, PostProcessor};
//!
//! let processor = JsonPostProcessor::new();
//! let value = processor
//!     .process("Here you go:\n```json\n{\"title\": \"Intro\",}\n```", "deepseek-chat")
//!     .unwrap();
//! assert_eq!(value["title"], "Intro");
//! ```

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::PostProcessor;
use crate::error::PostProcessError;

/// A pure parse attempt.
pub type ParseStrategy = fn(&str) -> Option<Value>;

/// Strategies in the order they are tried.
pub const DEFAULT_STRATEGIES: &[(&str, ParseStrategy)] = &[
    ("direct", parse_direct),
    ("cleaned", parse_cleaned),
    ("balanced", parse_balanced),
    ("all_objects", parse_all_objects),
    ("trailing_commas", parse_without_trailing_commas),
];

static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TRAILING_COMMA_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn compile(name: &str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern = name, error = %e, "Failed to compile JSON repair pattern");
            None
        }
    }
}

fn fence_re() -> Option<&'static Regex> {
    FENCE_RE
        .get_or_init(|| compile("code_fence", r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?\s*```$"))
        .as_ref()
}

fn trailing_comma_re() -> Option<&'static Regex> {
    TRAILING_COMMA_RE
        .get_or_init(|| compile("trailing_comma", r",(\s*[}\]])"))
        .as_ref()
}

/// Parse the trimmed text as-is.
pub fn parse_direct(content: &str) -> Option<Value> {
    serde_json::from_str(content.trim()).ok()
}

/// Strip a surrounding code fence, escape raw control characters inside
/// strings and undo markdown-escaped underscores, then parse.
pub fn parse_cleaned(content: &str) -> Option<Value> {
    let unfenced = strip_code_fence(content.trim());
    let escaped = escape_control_chars_in_strings(unfenced);
    let fixed = escaped.replace("\\_", "_");
    serde_json::from_str(fixed.trim()).ok()
}

/// Parse the first balanced object or array found anywhere in the text.
pub fn parse_balanced(content: &str) -> Option<Value> {
    let start = content.find(['{', '['])?;
    let candidate = &content[start..];
    let end = find_matching_close(candidate)?;
    let slice = &candidate[..=end];
    serde_json::from_str(slice)
        .ok()
        .or_else(|| serde_json::from_str(&escape_control_chars_in_strings(slice)).ok())
}

/// Collect every top-level object that parses into an array.
pub fn parse_all_objects(content: &str) -> Option<Value> {
    let mut objects = Vec::new();
    let mut offset = 0;
    while let Some(pos) = content[offset..].find('{') {
        let start = offset + pos;
        match find_matching_close(&content[start..]) {
            Some(end) => {
                let slice = &content[start..=start + end];
                if let Ok(value) = serde_json::from_str::<Value>(slice) {
                    objects.push(value);
                }
                offset = start + end + 1;
            }
            None => break,
        }
    }
    if objects.is_empty() {
        None
    } else {
        Some(Value::Array(objects))
    }
}

/// Remove trailing commas before `}` / `]`, then parse directly or by
/// balanced extraction.
pub fn parse_without_trailing_commas(content: &str) -> Option<Value> {
    let re = trailing_comma_re()?;
    let unfenced = strip_code_fence(content.trim());
    let fixed = re.replace_all(unfenced, "$1");
    parse_direct(&fixed).or_else(|| parse_balanced(&fixed))
}

/// Return the body of a ```` ```lang ... ``` ```` block spanning the whole text.
pub fn strip_code_fence(content: &str) -> &str {
    fence_re()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(content)
}

/// Escape literal newlines, carriage returns and tabs inside JSON strings.
pub fn escape_control_chars_in_strings(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_string = false;
    let mut escape_next = false;

    for c in content.chars() {
        if escape_next {
            escape_next = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' if in_string => {
                escape_next = true;
                out.push(c);
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Byte index of the bracket closing the one at position 0, skipping strings.
pub fn find_matching_close(s: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' | ']' if !in_string => {
                let open = stack.pop()?;
                if (open == '{') != (c == '}') {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Post-processor that extracts JSON with an ordered list of strategies.
#[derive(Debug, Clone)]
pub struct JsonPostProcessor {
    strategies: Vec<(&'static str, ParseStrategy)>,
    unwrap_data: bool,
    reject_empty: bool,
}

impl Default for JsonPostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonPostProcessor {
    /// Create a processor with the default strategies.
    pub fn new() -> Self {
        Self {
            strategies: DEFAULT_STRATEGIES.to_vec(),
            unwrap_data: false,
            reject_empty: true,
        }
    }

    /// Use a custom strategy list.
    pub fn with_strategies(mut self, strategies: Vec<(&'static str, ParseStrategy)>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Unwrap `{"data": [...]}` to the inner array.
    pub fn unwrap_data(mut self) -> Self {
        self.unwrap_data = true;
        self
    }

    /// Accept `[]` and `{}` as results.
    pub fn allow_empty(mut self) -> Self {
        self.reject_empty = false;
        self
    }

    fn finish(&self, value: Value) -> Value {
        if !self.unwrap_data {
            return value;
        }
        match value {
            Value::Object(mut map) if map.get("data").is_some_and(Value::is_array) => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        }
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

impl PostProcessor for JsonPostProcessor {
    fn process(&self, text: &str, model: &str) -> Result<Value, PostProcessError> {
        if text.trim().is_empty() {
            return Err(PostProcessError::Empty);
        }

        for (name, strategy) in &self.strategies {
            if let Some(value) = strategy(text) {
                let value = self.finish(value);
                if self.reject_empty && is_empty_container(&value) {
                    return Err(PostProcessError::Empty);
                }
                tracing::debug!(model = %model, strategy = %name, "Parsed JSON from response");
                return Ok(value);
            }
        }

        tracing::warn!(
            model = %model,
            strategies = self.strategies.len(),
            "No JSON strategy could parse the response"
        );
        Err(PostProcessError::Failed(
            "response does not contain parseable JSON".to_string(),
        ))
    }
}
