//! Lenient parsing of oracle responses into candidates.
//!
//! Oracles are language models; their output is JSON most of the time, but
//! it may be wrapped in a fenced code block or surrounded by prose. The
//! parser accepts:
//!
//! - the whole response as JSON
//! - the body of the first ```` ```json ```` (or bare ```` ``` ````) fence
//! - the first balanced `[...]` or `{...}` that parses as JSON
//!
//! A top-level array is a list of issues, an object with an `issues` array
//! is unwrapped, and any other object is a single issue. Entries that do
//! not fit (an issue, position, argument or evidence quote) are skipped one
//! by one without losing their siblings; a response where every issue is
//! unusable is malformed.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::OracleError;
use crate::resource::{IssueKind, Polarity};

const FENCE_PATTERN: &str = r"(?s)```(?:json|JSON)?\s*(.*?)```";

static FENCE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn fence_regex() -> Result<&'static Regex, OracleError> {
    FENCE
        .get_or_init(|| Regex::new(FENCE_PATTERN))
        .as_ref()
        .map_err(|e| OracleError::MalformedOutput {
            reason: format!("invalid fence pattern: {e}"),
        })
}

/// Everything the oracle extracted from one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    /// Issues in response order.
    pub issues: Vec<CandidateIssue>,
}

impl CandidateSet {
    /// Number of issues, positions, arguments and evidence quotes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issues
            .iter()
            .map(|i| {
                1 + i
                    .positions
                    .iter()
                    .map(|p| {
                        1 + p
                            .arguments
                            .iter()
                            .map(|a| 1 + a.evidence.len())
                            .sum::<usize>()
                    })
                    .sum::<usize>()
            })
            .sum()
    }

    /// True if nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A proposed issue with its positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateIssue {
    /// The question under debate.
    pub question: String,
    /// Issue kind; `Regular` when the oracle gave none or an unknown one.
    pub kind: IssueKind,
    /// Optional elaboration.
    pub description: Option<String>,
    /// Proposed answers.
    pub positions: Vec<CandidatePosition>,
}

/// A proposed answer to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePosition {
    /// The answer text.
    pub answer: String,
    /// Optional elaboration.
    pub description: Option<String>,
    /// Arguments for or against the answer.
    pub arguments: Vec<CandidateArgument>,
}

/// A proposed argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateArgument {
    /// Support or rebut.
    pub polarity: Polarity,
    /// Argument title; the warrant text when the oracle gave no separate
    /// claim.
    pub claim: String,
    /// Reasoning connecting the evidence to the position.
    pub warrant: Option<String>,
    /// Quotes backing the argument.
    pub evidence: Vec<CandidateEvidence>,
}

/// A proposed evidence quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEvidence {
    /// Verbatim quote from the chunk.
    pub quote: String,
    /// Source label, if the oracle named one.
    pub source: Option<String>,
}

#[derive(Deserialize)]
struct RawIssue {
    #[serde(alias = "title", alias = "issue")]
    question: String,
    #[serde(default, alias = "type", alias = "kind")]
    issue_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    positions: Value,
}

#[derive(Deserialize)]
struct RawPosition {
    #[serde(alias = "title", alias = "statement", alias = "position")]
    answer: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct RawArgument {
    #[serde(default, alias = "type", alias = "stance")]
    polarity: Option<String>,
    #[serde(default, alias = "title", alias = "argument")]
    claim: Option<String>,
    #[serde(default)]
    warrant: Option<String>,
    #[serde(default)]
    evidence: Value,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEvidence {
    Quote(String),
    Detailed {
        #[serde(alias = "text", alias = "content")]
        quote: String,
        #[serde(default)]
        source: Option<String>,
    },
}

/// Parses a raw oracle response.
///
/// # Errors
/// `MalformedOutput` if no JSON can be located or no item is usable.
pub fn parse_response(text: &str) -> Result<CandidateSet, OracleError> {
    let value = locate_json(text)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("issues") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("issues".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        other => {
            return Err(malformed(format!(
                "expected an array or object, got {}",
                json_type(&other)
            )))
        }
    };

    let total = items.len();
    let issues: Vec<CandidateIssue> = entries::<RawIssue>(Value::Array(items), "issue")
        .filter_map(convert_issue)
        .collect();
    if total > 0 && issues.is_empty() {
        return Err(malformed(format!("none of {total} item(s) is a usable issue")));
    }
    Ok(CandidateSet { issues })
}

/// Deserializes each entry of a list on its own, dropping the ones that do
/// not fit. `null` is an empty list and any other single value a list of
/// one.
fn entries<T: DeserializeOwned>(value: Value, what: &'static str) -> impl Iterator<Item = T> {
    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(move |item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(error = %e, what, "Skipping unusable candidate");
                None
            }
        })
}

fn locate_json(text: &str) -> Result<Value, OracleError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(malformed("empty response".to_string()));
    }
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }
    if let Some(body) = fence_regex()?
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
    {
        if let Ok(v) = serde_json::from_str(body) {
            return Ok(v);
        }
    }
    for (start, _) in trimmed.match_indices(|c: char| c == '[' || c == '{') {
        if let Some(end) = balanced_end(&trimmed[start..]) {
            if let Ok(v) = serde_json::from_str(&trimmed[start..start + end]) {
                return Ok(v);
            }
        }
    }
    Err(malformed("no JSON array or object found".to_string()))
}

/// Byte length of the balanced bracket group `text` starts with.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn convert_issue(raw: RawIssue) -> Option<CandidateIssue> {
    let question = clean(raw.question)?;
    let kind = raw
        .issue_type
        .as_deref()
        .and_then(|t| IssueKind::parse(&t.trim().to_ascii_lowercase()))
        .unwrap_or(IssueKind::Regular);
    Some(CandidateIssue {
        question,
        kind,
        description: raw.description.and_then(clean),
        positions: entries(raw.positions, "position").filter_map(convert_position).collect(),
    })
}

fn convert_position(raw: RawPosition) -> Option<CandidatePosition> {
    Some(CandidatePosition {
        answer: clean(raw.answer)?,
        description: raw.description.and_then(clean),
        arguments: entries(raw.arguments, "argument").filter_map(convert_argument).collect(),
    })
}

fn convert_argument(raw: RawArgument) -> Option<CandidateArgument> {
    let warrant = raw.warrant.and_then(clean);
    let claim = raw.claim.and_then(clean).or_else(|| warrant.clone())?;
    let fallback_source = raw.source;
    let evidence = entries::<RawEvidence>(raw.evidence, "evidence")
        .filter_map(|e| {
            let (quote, source) = match e {
                RawEvidence::Quote(q) => (q, None),
                RawEvidence::Detailed { quote, source } => (quote, source),
            };
            Some(CandidateEvidence {
                quote: clean(quote)?,
                source: source.and_then(clean).or_else(|| fallback_source.clone()),
            })
        })
        .collect();
    Some(CandidateArgument {
        polarity: parse_polarity(raw.polarity.as_deref()),
        claim,
        warrant,
        evidence,
    })
}

fn parse_polarity(raw: Option<&str>) -> Polarity {
    let Some(raw) = raw else {
        return Polarity::Support;
    };
    let lower = raw.trim().to_ascii_lowercase();
    if ["reb", "con", "against", "oppos", "refut"]
        .iter()
        .any(|p| lower.starts_with(p))
    {
        Polarity::Rebut
    } else {
        Polarity::Support
    }
}

fn clean(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else if t.len() == s.len() {
        Some(s)
    } else {
        Some(t.to_string())
    }
}

fn malformed(reason: String) -> OracleError {
    OracleError::MalformedOutput { reason }
}

const fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"[
      {
        "question": "Is X hazardous?",
        "issue_type": "hypothesis",
        "positions": [
          {
            "answer": "X is hazardous",
            "arguments": [
              {"polarity": "support", "warrant": "Readings exceed limits",
               "evidence": ["sensor reading > threshold"]},
              {"polarity": "rebuttal", "claim": "Readings are noisy",
               "evidence": {"quote": "the sensor was miscalibrated", "source": "audit"}}
            ]
          }
        ]
      }
    ]"#;

    #[test]
    fn parses_nested_candidates() {
        let set = parse_response(NESTED).unwrap();
        assert_eq!(set.issues.len(), 1);
        let issue = &set.issues[0];
        assert_eq!(issue.kind, IssueKind::Hypothesis);
        let args = &issue.positions[0].arguments;
        assert_eq!(args[0].polarity, Polarity::Support);
        assert_eq!(args[0].claim, "Readings exceed limits");
        assert_eq!(args[0].evidence[0].quote, "sensor reading > threshold");
        assert_eq!(args[1].polarity, Polarity::Rebut);
        assert_eq!(args[1].warrant, None);
        assert_eq!(args[1].evidence[0].source.as_deref(), Some("audit"));
        assert_eq!(set.len(), 6);
    }

    #[test]
    fn accepts_fenced_json_and_prose() {
        let fenced = format!("Here you go:\n```json\n{NESTED}\n```\nDone.");
        assert_eq!(parse_response(&fenced).unwrap().issues.len(), 1);

        let prose = "I found: {\"question\": \"Should we [really] act?\"} and nothing else";
        let set = parse_response(prose).unwrap();
        assert_eq!(set.issues[0].question, "Should we [really] act?");
        assert_eq!(set.issues[0].kind, IssueKind::Regular);
    }

    #[test]
    fn unwraps_issues_object_and_maps_unknown_types() {
        let set = parse_response(r#"{"issues": [{"title": "Q", "type": "speculative"}]}"#).unwrap();
        assert_eq!(set.issues[0].question, "Q");
        assert_eq!(set.issues[0].kind, IssueKind::Regular);
    }

    #[test]
    fn empty_array_is_an_empty_set() {
        assert!(parse_response("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_unusable_output() {
        for bad in ["", "no json here", "42", r#"[{"nothing": 1}]"#, "[1, 2]"] {
            assert!(
                matches!(parse_response(bad), Err(OracleError::MalformedOutput { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn skips_blank_entries() {
        let set = parse_response(
            r#"[{"question": "Q", "positions": [{"answer": "  "}, {"answer": "A", "arguments": [{"polarity": "support"}]}]}]"#,
        )
        .unwrap();
        assert_eq!(set.issues[0].positions.len(), 1);
        assert!(set.issues[0].positions[0].arguments.is_empty());
    }

    #[test]
    fn bad_nested_entries_do_not_sink_their_issue() {
        let set = parse_response(
            r#"[{"question":"Evacuate?","positions":[{"answer":"Yes"},{"description":"missing answer"}]}]"#,
        )
        .unwrap();
        assert_eq!(set.issues.len(), 1);
        assert_eq!(set.issues[0].positions.len(), 1);
        assert_eq!(set.issues[0].positions[0].answer, "Yes");

        let set = parse_response(
            r#"[{"question": "Q", "positions": [{"answer": "A", "arguments": [
                {"claim": "kept", "evidence": ["a quote", {"source": "no quote"}, 7]},
                {"claim": ["not", "text"]}
            ]}]}]"#,
        )
        .unwrap();
        let args = &set.issues[0].positions[0].arguments;
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].claim, "kept");
        assert_eq!(args[0].evidence.len(), 1);
        assert_eq!(args[0].evidence[0].quote, "a quote");
    }

    #[test]
    fn single_objects_stand_in_for_lists() {
        let set = parse_response(
            r#"{"question": "Q", "positions": {"answer": "A", "arguments": {"claim": "C", "evidence": "E"}}}"#,
        )
        .unwrap();
        let position = &set.issues[0].positions[0];
        assert_eq!(position.answer, "A");
        assert_eq!(position.arguments[0].evidence[0].quote, "E");
    }

    #[test]
    fn balanced_scan_respects_strings() {
        assert_eq!(balanced_end(r#"{"a": "}"} tail"#), Some(10));
        assert_eq!(balanced_end("[1, [2]"), None);
    }
}
