//! SequenceComparator - exact, order-sensitive equivalence of two results
//!
//! Two sequences are equivalent only when they have the same length and are
//! equal element by element. On a mismatch the comparator reports the first
//! differing index, the value on each side (absent when one side ended
//! early) and a unified diff of the listings around that index.

use std::fmt;

use serde::Serialize;
use similar::TextDiff;

/// Items shown on each side of the first mismatch in the unified diff.
const DEFAULT_CONTEXT: usize = 3;

/// First point at which baseline and current disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    /// Scenario that produced the two sequences.
    pub scenario: String,
    /// Index of the first differing element.
    pub index: usize,
    /// Baseline element at `index`, `None` past its end.
    pub baseline: Option<String>,
    /// Current element at `index`, `None` past its end.
    pub current: Option<String>,
    pub baseline_len: usize,
    pub current_len: usize,
    /// Unified diff of both listings around `index`.
    pub unified_diff: String,
}

impl Divergence {
    /// Whether the two sequences differ in length.
    pub const fn is_length_mismatch(&self) -> bool {
        self.baseline_len != self.current_len
    }
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |value: &Option<String>| value.clone().unwrap_or_else(|| "<end>".to_string());
        write!(
            f,
            "{}: first difference at index {}: baseline {}, current {}",
            self.scenario,
            self.index,
            side(&self.baseline),
            side(&self.current)
        )?;
        if self.is_length_mismatch() {
            write!(
                f,
                " (baseline produced {}, current produced {})",
                self.baseline_len, self.current_len
            )?;
        }
        Ok(())
    }
}

/// Result of comparing two sequences
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareResult {
    /// Same length, equal element by element
    Equal,
    /// Sequences diverge
    Different(Box<Divergence>),
}

impl CompareResult {
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Equal)
    }

    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Different(_))
    }

    /// Get the divergence if this is a Different result
    pub fn divergence(&self) -> Option<&Divergence> {
        match self {
            Self::Different(divergence) => Some(divergence),
            Self::Equal => None,
        }
    }

    /// Convert into a `Result`, failures becoming the boxed divergence.
    pub fn into_result(self) -> Result<(), Box<Divergence>> {
        match self {
            Self::Equal => Ok(()),
            Self::Different(divergence) => Err(divergence),
        }
    }
}

/// Compares baseline and current sequences.
#[derive(Debug, Clone, Copy)]
pub struct SequenceComparator {
    context: usize,
}

impl Default for SequenceComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceComparator {
    pub const fn new() -> Self {
        Self {
            context: DEFAULT_CONTEXT,
        }
    }

    /// Number of items shown before and after the mismatch in the diff.
    #[must_use]
    pub const fn context(mut self, items: usize) -> Self {
        self.context = items;
        self
    }

    /// Compare two sequences for exact, order-sensitive equality.
    pub fn compare<T>(&self, scenario: &str, baseline: &[T], current: &[T]) -> CompareResult
    where
        T: PartialEq + fmt::Display,
    {
        let Some(index) = first_difference(baseline, current) else {
            return CompareResult::Equal;
        };

        let end = index.saturating_add(self.context).saturating_add(1);
        let window = index.saturating_sub(self.context)..end;
        let listing = |items: &[T]| {
            items
                .iter()
                .enumerate()
                .skip(window.start)
                .take(window.end - window.start)
                .map(|(i, item)| format!("[{i}] {item}\n"))
                .collect::<String>()
        };

        CompareResult::Different(Box::new(Divergence {
            scenario: scenario.to_string(),
            index,
            baseline: baseline.get(index).map(ToString::to_string),
            current: current.get(index).map(ToString::to_string),
            baseline_len: baseline.len(),
            current_len: current.len(),
            unified_diff: unified_diff(&listing(baseline), &listing(current)),
        }))
    }
}

fn first_difference<T: PartialEq>(baseline: &[T], current: &[T]) -> Option<usize> {
    baseline
        .iter()
        .zip(current)
        .position(|(b, c)| b != c)
        .or_else(|| (baseline.len() != current.len()).then(|| baseline.len().min(current.len())))
}

fn unified_diff(baseline: &str, current: &str) -> String {
    let diff = TextDiff::from_lines(baseline, current);
    let mut result = String::from("--- baseline\n+++ current\n");
    for hunk in diff.unified_diff().iter_hunks() {
        result.push_str(&hunk.to_string());
    }
    result
}
