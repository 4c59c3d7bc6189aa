//! Tolerant parsing of free-text model output into a [`Response`].
//!
//! Models are asked for a single JSON object but routinely wrap it in
//! markdown fences, add prose around it, nest the payload under a wrapper
//! key, or return objects where strings were requested. Parsing therefore
//! runs as an explicit pipeline:
//!
//! ```text
//! raw text
//!   └─ extract_json      fenced block → outermost {...} → raw text
//!       └─ decode         serde_json::Value (structural decode only)
//!           └─ recover_shape   ordered SHAPE_RULES, first match wins
//!               └─ field normalizers  sections, verdicts, change_requests, strings
//!                   └─ validate       at least one section
//! ```
//!
//! Every stage either yields a value or a typed [`ParseError`]; nothing is
//! repaired inline at call sites.
//!
//! # Example
//!
//! ```rust
//! use debatellm::parser::parse_response;
//! use debatellm::response::Verdict;
//!
//! let raw = "Here you go:\n```json\n\
//!     {\"overall_verdict\": \"LGTM!\", \"sections\": \
//!     [{\"title\": \"A\", \"content\": \"c\", \"verdict\": \"Denied.\"}]}\n```";
//!
//! let response = parse_response(raw).unwrap();
//! assert_eq!(response.overall_verdict, Verdict::Approve);
//! assert_eq!(response.sections[0].verdict, Verdict::Reject);
//! ```

use crate::debatellm::response::{Response, Section, Verdict};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"```\w*\s*\n([\s\S]*?)\n\s*```").expect("fence pattern is valid");
}

/// Wrapper keys some models nest the real payload under.
const WRAPPER_KEYS: &[&str] = &[
    "specification",
    "response",
    "result",
    "design",
    "spec",
    "proposal",
];

/// Descriptive fields concatenated (in this order) when a change request
/// arrives as an object instead of a string.
const CHANGE_REQUEST_FIELDS: &[&str] = &[
    "title",
    "description",
    "change",
    "reason",
    "request",
    "content",
];

/// Why a raw model reply could not be turned into a [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The extracted text is not valid JSON.
    InvalidJson(String),
    /// The JSON decoded, but its root is neither an object nor an array of
    /// section-shaped objects.
    NotAnObject,
    /// A field is present but has a type that cannot be coerced.
    InvalidField {
        /// Dotted path of the offending field (e.g. `sections.2.content`).
        path: String,
        /// What was expected.
        reason: String,
    },
    /// The JSON is structurally valid but carries no sections.
    NoSections,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidJson(msg) => write!(f, "Invalid JSON: {}", msg),
            ParseError::NotAnObject => write!(f, "Response is not a JSON object"),
            ParseError::InvalidField { path, reason } => write!(f, "{}: {}", path, reason),
            ParseError::NoSections => write!(f, "No sections found in response"),
        }
    }
}

impl Error for ParseError {}

/// A shape-recovery rule: given the decoded top-level object, return a
/// rewritten object if the rule applies.
pub type ShapeRule = fn(&Map<String, Value>) -> Option<Map<String, Value>>;

/// Shape-recovery rules in application order. The first rule that returns
/// `Some` wins; when none applies the object is used unchanged.
pub const SHAPE_RULES: &[ShapeRule] = &[keep_populated_sections, hoist_wrapper, adopt_section_array];

/// Parse raw model output into a normalized [`Response`].
pub fn parse_response(raw: &str) -> Result<Response, ParseError> {
    let decoded = decode(extract_json(raw))?;
    let object = recover_shape(decoded)?;
    let response = normalize_fields(&object)?;

    if response.sections.is_empty() {
        return Err(ParseError::NoSections);
    }
    Ok(response)
}

/// Pick the substring of `raw` most likely to hold the JSON payload.
///
/// Preference order: the contents of the first fenced code block (any
/// language tag), then the whole text when it decodes as a JSON array, then
/// the span from the first `{` to the last `}`, then the raw text itself.
/// Bracketed prose around an object is not an array.
pub fn extract_json(raw: &str) -> &str {
    if let Some(inner) = FENCED_BLOCK.captures(raw).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('[')
        && trimmed.ends_with(']')
        && serde_json::from_str::<Vec<Value>>(trimmed).is_ok()
    {
        return trimmed;
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            return &raw[start..=end];
        }
    }

    raw
}

/// Structural decode only; no schema knowledge.
pub fn decode(text: &str) -> Result<Value, ParseError> {
    serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

/// Bring a decoded value into the canonical `{ "sections": [...], ... }`
/// object shape by applying [`SHAPE_RULES`].
pub fn recover_shape(value: Value) -> Result<Map<String, Value>, ParseError> {
    let object = match value {
        Value::Object(map) => map,
        Value::Array(items) if looks_like_section_list(&items) => {
            let mut map = Map::new();
            map.insert("sections".to_string(), Value::Array(items));
            map
        }
        _ => return Err(ParseError::NotAnObject),
    };

    for rule in SHAPE_RULES {
        if let Some(rewritten) = rule(&object) {
            return Ok(rewritten);
        }
    }
    Ok(object)
}

fn keep_populated_sections(obj: &Map<String, Value>) -> Option<Map<String, Value>> {
    match obj.get("sections") {
        Some(Value::Array(items)) if !items.is_empty() => Some(obj.clone()),
        _ => None,
    }
}

fn hoist_wrapper(obj: &Map<String, Value>) -> Option<Map<String, Value>> {
    WRAPPER_KEYS.iter().find_map(|key| {
        let inner = obj.get(*key)?.as_object()?;
        match inner.get("sections") {
            Some(Value::Array(items)) if !items.is_empty() => {
                let mut merged = obj.clone();
                for (k, v) in inner {
                    merged.insert(k.clone(), v.clone());
                }
                Some(merged)
            }
            _ => None,
        }
    })
}

fn adopt_section_array(obj: &Map<String, Value>) -> Option<Map<String, Value>> {
    obj.values().find_map(|value| match value {
        Value::Array(items) if looks_like_section_list(items) => {
            let mut merged = obj.clone();
            merged.insert("sections".to_string(), value.clone());
            Some(merged)
        }
        _ => None,
    })
}

fn looks_like_section_list(items: &[Value]) -> bool {
    items
        .first()
        .map(|first| is_truthy(first.get("title")) && is_truthy(first.get("content")))
        .unwrap_or(false)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}

fn normalize_fields(obj: &Map<String, Value>) -> Result<Response, ParseError> {
    Ok(Response {
        sections: normalize_sections(obj.get("sections"))?,
        overall_verdict: Verdict::from_value(obj.get("overall_verdict")),
        change_requests: normalize_change_requests(obj.get("change_requests"))?,
        summary: optional_string(obj.get("summary"), "summary")?,
        project_title: optional_string(obj.get("project_title"), "project_title")?,
    })
}

fn normalize_sections(value: Option<&Value>) -> Result<Vec<Section>, ParseError> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ParseError::InvalidField {
                path: "sections".to_string(),
                reason: "expected an array".to_string(),
            })
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| normalize_section(i, item))
        .collect()
}

fn normalize_section(index: usize, item: &Value) -> Result<Section, ParseError> {
    let obj = item.as_object().ok_or_else(|| ParseError::InvalidField {
        path: format!("sections.{}", index),
        reason: "expected an object".to_string(),
    })?;

    Ok(Section {
        title: required_string(obj.get("title"), &format!("sections.{}.title", index))?,
        content: required_string(obj.get("content"), &format!("sections.{}.content", index))?,
        verdict: Verdict::from_value(obj.get("verdict")),
        reasoning: optional_string(obj.get("reasoning"), &format!("sections.{}.reasoning", index))?,
    })
}

fn normalize_change_requests(value: Option<&Value>) -> Result<Vec<String>, ParseError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().map(coerce_change_request).collect()),
        Some(_) => Err(ParseError::InvalidField {
            path: "change_requests".to_string(),
            reason: "expected an array".to_string(),
        }),
    }
}

/// Flatten one `change_requests` item to a string.
///
/// Strings pass through. Objects are flattened by joining the non-empty
/// descriptive fields (`title`, `description`, `change`, `reason`,
/// `request`, `content`) with `": "`, or JSON-encoded when none are present.
pub fn coerce_change_request(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            let parts: Vec<&str> = CHANGE_REQUEST_FIELDS
                .iter()
                .filter_map(|field| obj.get(*field).and_then(|v| v.as_str()))
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                item.to_string()
            } else {
                parts.join(": ")
            }
        }
        other => other.to_string(),
    }
}

fn required_string(value: Option<&Value>, path: &str) -> Result<String, ParseError> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ParseError::InvalidField {
            path: path.to_string(),
            reason: "expected a string".to_string(),
        }),
        None => Err(ParseError::InvalidField {
            path: path.to_string(),
            reason: "required".to_string(),
        }),
    }
}

fn optional_string(value: Option<&Value>, path: &str) -> Result<String, ParseError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ParseError::InvalidField {
            path: path.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}
