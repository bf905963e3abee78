//! Best-effort repair of near-JSON fragments.
//!
//! Some providers emit event payloads with unquoted keys, bare string values,
//! `True`/`NULL` literals, stray control bytes, or a missing closing brace. The
//! repair pass fixes those damage classes in a fixed order and then parses:
//!
//! 1. empty / placeholder input becomes `{}`
//! 2. bare object keys are quoted
//! 3. bare scalar values that are not literals or numbers are quoted
//! 4. boolean and null literals are lower-cased
//! 5. control characters are stripped
//! 6. unclosed strings, objects, and arrays are closed
//!
//! Steps 2 to 4 only touch text outside string literals. Input that already parses
//! is returned untouched. A heuristic, not a parser: callers get either the
//! repaired text or a [`RepairFailure`] describing what was tried, never a panic.

use crate::error::Error;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::fmt;

static KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\{,]\s*)([A-Za-z_$][A-Za-z0-9_$\-]*)(\s*):").expect("static regex")
});

static VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(:\s*)([^\s"\{\[,\}\]:][^,\}\]\n]*)"#).expect("static regex"));

static LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(true|false|null)\b").expect("static regex"));

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?$").expect("static regex")
});

static CONTROL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("static regex"));

const PLACEHOLDERS: &[&str] = &["", "undefined", "None", "..."];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairStep {
    EmptyToObject,
    QuoteKeys,
    QuoteValues,
    NormalizeLiterals,
    StripControlChars,
    BalanceBrackets,
}

impl RepairStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStep::EmptyToObject => "empty_to_object",
            RepairStep::QuoteKeys => "quote_keys",
            RepairStep::QuoteValues => "quote_values",
            RepairStep::NormalizeLiterals => "normalize_literals",
            RepairStep::StripControlChars => "strip_control_chars",
            RepairStep::BalanceBrackets => "balance_brackets",
        }
    }
}

impl fmt::Display for RepairStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostics for a fragment that could not be repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairFailure {
    pub original: String,
    /// Text after all repair steps ran.
    pub attempted: String,
    /// Every step that ran, in order.
    pub steps: Vec<RepairStep>,
    /// The subset of `steps` that modified the text.
    pub changed: Vec<RepairStep>,
    /// Parser error on the repaired text.
    pub reason: String,
}

impl fmt::Display for RepairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.as_str()).collect();
        let changed: Vec<&str> = self.changed.iter().map(|s| s.as_str()).collect();
        write!(
            f,
            "unrepairable JSON fragment ({}); steps tried: [{}]; changed: [{}]",
            self.reason,
            steps.join(", "),
            changed.join(", ")
        )
    }
}

impl std::error::Error for RepairFailure {}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    Repaired {
        /// Compact serialization of `value`.
        text: String,
        value: Value,
        /// Steps that changed the input; empty when it parsed as-is.
        steps: Vec<RepairStep>,
    },
    Failed(RepairFailure),
}

impl RepairOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            RepairOutcome::Repaired { value, .. } => Some(value),
            RepairOutcome::Failed(_) => None,
        }
    }

    /// For callers that abort on a bad frame instead of skipping it.
    pub fn into_result(self) -> crate::Result<Value> {
        match self {
            RepairOutcome::Repaired { value, .. } => Ok(value),
            RepairOutcome::Failed(f) => Err(Error::StreamRepair(f)),
        }
    }
}

/// Repair `input` into valid JSON, or describe why that was not possible.
pub fn repair_json(input: &str) -> RepairOutcome {
    if let Ok(value) = serde_json::from_str::<Value>(input) {
        return RepairOutcome::Repaired {
            text: value.to_string(),
            value,
            steps: Vec::new(),
        };
    }

    let mut tried = Vec::new();
    let mut steps = Vec::new();
    let mut text = input.trim().to_string();

    let mut apply = |step: RepairStep, text: &mut String, next: String| {
        tried.push(step);
        if *text != next {
            steps.push(step);
            *text = next;
        }
    };

    if PLACEHOLDERS.contains(&text.as_str()) {
        apply(RepairStep::EmptyToObject, &mut text, "{}".to_string());
    }
    let next = map_outside_strings(&text, quote_keys);
    apply(RepairStep::QuoteKeys, &mut text, next);
    let next = map_outside_strings(&text, quote_values);
    apply(RepairStep::QuoteValues, &mut text, next);
    let next = map_outside_strings(&text, normalize_literals);
    apply(RepairStep::NormalizeLiterals, &mut text, next);
    let next = CONTROL_RE.replace_all(&text, "").into_owned();
    apply(RepairStep::StripControlChars, &mut text, next);
    let next = balance_brackets(&text);
    apply(RepairStep::BalanceBrackets, &mut text, next);

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => RepairOutcome::Repaired {
            text: value.to_string(),
            value,
            steps,
        },
        Err(e) => RepairOutcome::Failed(RepairFailure {
            original: input.to_string(),
            attempted: text,
            steps: tried,
            changed: steps,
            reason: e.to_string(),
        }),
    }
}

fn quote_keys(segment: &str) -> String {
    KEY_RE
        .replace_all(segment, |c: &Captures| format!("{}\"{}\"{}:", &c[1], &c[2], &c[3]))
        .into_owned()
}

fn quote_values(segment: &str) -> String {
    VALUE_RE
        .replace_all(segment, |c: &Captures| {
            let raw = &c[2];
            let value = raw.trim_end();
            let trailing = &raw[value.len()..];
            if is_literal(value) {
                format!("{}{}{}", &c[1], value, trailing)
            } else {
                let quoted = Value::String(value.to_string()).to_string();
                format!("{}{}{}", &c[1], quoted, trailing)
            }
        })
        .into_owned()
}

fn normalize_literals(segment: &str) -> String {
    LITERAL_RE
        .replace_all(segment, |c: &Captures| c[1].to_ascii_lowercase())
        .into_owned()
}

fn is_literal(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    matches!(lower.as_str(), "true" | "false" | "null") || NUMBER_RE.is_match(value)
}

/// Apply `f` to every run of text that lies outside a string literal.
fn map_outside_strings(text: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut plain = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            out.push_str(&f(&plain));
            plain.clear();
            out.push(ch);
            in_string = true;
        } else {
            plain.push(ch);
        }
    }
    out.push_str(&f(&plain));
    out
}

/// Close an unterminated string, drop a dangling comma, and append the missing
/// closers for every `{`/`[` still open at the end of the text.
fn balance_brackets(text: &str) -> String {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.last() == Some(&ch) {
                    open.pop();
                }
            }
            _ => {}
        }
    }

    if !in_string && open.is_empty() {
        return text.to_string();
    }

    let mut out = text.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    } else {
        let kept = out.trim_end().trim_end_matches(',').len();
        out.truncate(kept);
    }
    while let Some(close) = open.pop() {
        out.push(close);
    }
    out
}
