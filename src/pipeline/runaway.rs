//! Runaway generation detection.
//!
//! Two independent triggers stop a stream that is looping instead of finishing:
//!
//! - the same error signature (matched by `error_pattern`) seen on
//!   `error_repeat_threshold` consecutive matching fragments;
//! - two equal-length line sequences in the sliding window (overlap allowed)
//!   whose normalised edit-distance similarity reaches `similarity_threshold`.
//!
//! Sequence comparison is filtered before any edit distance is computed: a length
//! check, then a character-trigram count bound, then a banded Levenshtein that
//! gives up once the distance can no longer meet the threshold.

use crate::error::{Error, ErrorContext};
use crate::types::RunawayReason;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Recurring runtime-failure text that generation loops tend to repeat.
pub const DEFAULT_ERROR_PATTERN: &str = concat!(
    r"(?i)(?:traceback \(most recent call last\)",
    r"|\b(?:type|reference|syntax|runtime|value|key|attribute|name)error\b:?[^\n]*",
    r"|unhandled (?:promise )?rejection[^\n]*",
    r"|panicked at [^\n]*)",
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunawayConfig {
    pub error_pattern: String,
    pub error_repeat_threshold: u32,
    /// Lines compared per check; the window retains twice this many.
    pub check_window: usize,
    pub min_sequence_len: usize,
    pub similarity_threshold: f64,
}

impl Default for RunawayConfig {
    fn default() -> Self {
        Self {
            error_pattern: DEFAULT_ERROR_PATTERN.to_string(),
            error_repeat_threshold: 4,
            check_window: 20,
            min_sequence_len: 3,
            similarity_threshold: 0.9,
        }
    }
}

impl RunawayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.error_repeat_threshold == 0 {
            return Err(invalid("runaway.error_repeat_threshold", "must be at least 1"));
        }
        if self.min_sequence_len == 0 {
            return Err(invalid("runaway.min_sequence_len", "must be at least 1"));
        }
        if self.check_window < self.min_sequence_len {
            return Err(invalid(
                "runaway.check_window",
                "must be at least min_sequence_len",
            ));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(invalid(
                "runaway.similarity_threshold",
                "must be in (0.0, 1.0]",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        "invalid runaway detector settings",
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details),
    )
}

/// Per-stream detector state. Create one per request.
#[derive(Debug)]
pub struct RunawayDetector {
    cfg: RunawayConfig,
    error_re: Regex,
    last_error: Option<String>,
    error_count: u32,
    partial_line: String,
    window: VecDeque<WindowLine>,
}

#[derive(Debug)]
struct WindowLine {
    chars: Vec<char>,
    /// Character trigrams, three 21-bit code points packed per key.
    grams: Vec<u64>,
}

impl WindowLine {
    fn new(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let grams = chars
            .windows(3)
            .map(|w| (w[0] as u64) << 42 | (w[1] as u64) << 21 | w[2] as u64)
            .collect();
        Self { chars, grams }
    }
}

/// Size facts of a `\n`-joined run of window lines.
struct SequenceStats {
    chars: usize,
    /// Trigrams of the joined text that span a line break.
    cross: usize,
}

impl SequenceStats {
    fn of(lines: &[&WindowLine]) -> Self {
        let chars = lines.iter().map(|l| l.chars.len()).sum::<usize>() + lines.len() - 1;
        let intra: usize = lines.iter().map(|l| l.grams.len()).sum();
        Self {
            chars,
            cross: chars.saturating_sub(2).saturating_sub(intra),
        }
    }
}

/// Running multiset intersection between a sliding candidate and a fixed target.
struct GramOverlap<'a> {
    target: &'a HashMap<u64, u32>,
    counts: HashMap<u64, u32>,
    shared: usize,
}

impl<'a> GramOverlap<'a> {
    fn new(target: &'a HashMap<u64, u32>) -> Self {
        Self {
            target,
            counts: HashMap::new(),
            shared: 0,
        }
    }

    fn add(&mut self, line: &WindowLine) {
        for g in &line.grams {
            if let Some(&want) = self.target.get(g) {
                let c = self.counts.entry(*g).or_insert(0);
                if *c < want {
                    self.shared += 1;
                }
                *c += 1;
            }
        }
    }

    fn remove(&mut self, line: &WindowLine) {
        for g in &line.grams {
            if let (Some(&want), Some(c)) = (self.target.get(g), self.counts.get_mut(g)) {
                *c -= 1;
                if *c < want {
                    self.shared -= 1;
                }
            }
        }
    }
}

impl RunawayDetector {
    pub fn new(cfg: RunawayConfig) -> Result<Self> {
        cfg.validate()?;
        let error_re = Regex::new(&cfg.error_pattern).map_err(|e| {
            Error::configuration_with_context(
                "invalid runaway error pattern",
                ErrorContext::new()
                    .with_field_path("runaway.error_pattern")
                    .with_details(e.to_string()),
            )
        })?;
        Ok(Self {
            cfg,
            error_re,
            last_error: None,
            error_count: 0,
            partial_line: String::new(),
            window: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &RunawayConfig {
        &self.cfg
    }

    /// Feed one decoded content fragment. Returns the trigger once the stream
    /// should be cut.
    pub fn observe(&mut self, fragment: &str) -> Option<RunawayReason> {
        if let Some(reason) = self.check_error(fragment) {
            return Some(reason);
        }

        self.partial_line.push_str(fragment);
        while let Some(pos) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.window.push_back(WindowLine::new(line));
            while self.window.len() > self.cfg.check_window * 2 {
                self.window.pop_front();
            }
            if let Some(reason) = self.check_sequences() {
                return Some(reason);
            }
        }
        None
    }

    /// Lines currently retained in the sliding window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.last_error = None;
        self.error_count = 0;
        self.partial_line.clear();
        self.window.clear();
    }

    fn check_error(&mut self, fragment: &str) -> Option<RunawayReason> {
        // Fragments without a match leave the streak alone; a different match restarts it.
        let found = self.error_re.find(fragment)?.as_str().trim().to_string();
        if self.last_error.as_deref() == Some(found.as_str()) {
            self.error_count += 1;
        } else {
            self.last_error = Some(found);
            self.error_count = 1;
        }
        if self.error_count >= self.cfg.error_repeat_threshold {
            return Some(RunawayReason::RepeatedError {
                pattern: self.last_error.clone().unwrap_or_default(),
                occurrences: self.error_count,
            });
        }
        None
    }

    /// Compare every sequence in the window against the one ending at the newest line.
    /// Pairs that do not involve the newest line were checked on earlier calls.
    fn check_sequences(&self) -> Option<RunawayReason> {
        let lines: Vec<&WindowLine> = self.window.iter().collect();
        let n = lines.len();
        let threshold = self.cfg.similarity_threshold;
        let longest = (self.cfg.check_window / 2)
            .max(self.cfg.min_sequence_len)
            .min(n.saturating_sub(1));

        for len in self.cfg.min_sequence_len..=longest {
            let latest_lines = &lines[n - len..];
            let latest = SequenceStats::of(latest_lines);
            let latest_text = join_lines(latest_lines);
            let mut target: HashMap<u64, u32> = HashMap::new();
            for g in latest_lines.iter().flat_map(|l| l.grams.iter()) {
                *target.entry(*g).or_insert(0) += 1;
            }

            let mut overlap = GramOverlap::new(&target);
            for line in &lines[..len] {
                overlap.add(line);
            }
            for start in 0..(n - len) {
                if start > 0 {
                    overlap.remove(lines[start - 1]);
                    overlap.add(lines[start + len - 1]);
                }
                let candidate = &lines[start..start + len];
                let stats = SequenceStats::of(candidate);
                let max_len = stats.chars.max(latest.chars);
                let budget = edit_budget(max_len, threshold);
                if stats.chars.abs_diff(latest.chars) > budget {
                    continue;
                }
                // Each edit destroys at most three trigrams.
                let needed =
                    max_len.saturating_sub(2 + 3 * budget + stats.cross + latest.cross);
                if overlap.shared < needed {
                    continue;
                }
                let text = join_lines(candidate);
                if let Some(distance) = bounded_levenshtein(&text, &latest_text, budget) {
                    let score = (max_len - distance) as f64 / max_len as f64;
                    return Some(RunawayReason::RepeatedSequence {
                        length: len,
                        similarity_pct: (score * 100.0).round() as u32,
                    });
                }
            }
        }
        None
    }
}

fn join_lines(lines: &[&WindowLine]) -> Vec<char> {
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.extend_from_slice(&line.chars);
    }
    out
}

/// Largest edit distance that still scores at least `threshold` over `len` chars.
fn edit_budget(len: usize, threshold: f64) -> usize {
    let scores = |k: usize| (len - k) as f64 / len as f64 >= threshold;
    let mut k = (((1.0 - threshold) * len as f64).floor() as usize).min(len);
    while k < len && scores(k + 1) {
        k += 1;
    }
    while k > 0 && !scores(k) {
        k -= 1;
    }
    k
}

/// `(max_len - edit_distance) / max_len`, in characters. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = bounded_levenshtein(&a, &b, max_len).unwrap_or(max_len);
    (max_len - distance) as f64 / max_len as f64
}

/// Edit distance restricted to the diagonal band of width `2 * max + 1`.
/// Returns `None` as soon as the distance must exceed `max`.
fn bounded_levenshtein(a: &[char], b: &[char], max: usize) -> Option<usize> {
    let (la, lb) = (a.len(), b.len());
    if la.abs_diff(lb) > max {
        return None;
    }
    if la == 0 || lb == 0 {
        return Some(la.max(lb));
    }
    let over = max + 1;
    let mut prev: Vec<usize> = (0..=lb).map(|j| if j <= max { j } else { over }).collect();
    let mut curr = vec![over; lb + 1];
    for i in 1..=la {
        let lo = i.saturating_sub(max).max(1);
        let hi = (i + max).min(lb);
        curr[0] = if i <= max { i } else { over };
        curr[lo - 1] = if lo == 1 { curr[0] } else { over };
        let mut row_min = curr[0];
        for j in lo..=hi {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let v = (prev[j - 1] + cost)
                .min(prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(over);
            curr[j] = v;
            row_min = row_min.min(v);
        }
        if hi < lb {
            curr[hi + 1] = over;
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    Some(prev[lb]).filter(|d| *d <= max)
}
