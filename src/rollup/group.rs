//! Stage 3 of the rollup: group-by-key concatenation.
//!
//! Consumes a key-sorted stream of `key,tail` lines and emits one line per
//! key run: `key,tail1\x00tail2\x00...\x00tailn`, with duplicate tails
//! collapsed. Grouping is single-threaded and order-preserving, so it
//! streams with constant memory per key run. Common scan artifacts are
//! scrubbed here as values accumulate.

use std::borrow::Cow;
use std::collections::HashSet;

/// Joins the per-line tails inside a grouped value.
pub const RECORD_SEPARATOR: char = '\u{0}';

/// Outcome of feeding one line to the grouper.
#[derive(Debug, Default, PartialEq)]
pub struct Grouped {
    /// A completed group, emitted when the incoming key differs from the
    /// current run's key.
    pub emitted: Option<String>,
    /// The line was unusable and should count as invalid.
    pub invalid: bool,
}

#[derive(Default)]
pub struct Grouper {
    current_key: String,
    values: Vec<String>,
}

impl Grouper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: &str) -> Grouped {
        let raw = line.trim();
        if raw.is_empty() {
            return Grouped::default();
        }

        let (key, value) = match raw.split_once(',') {
            Some((key, value)) if !key.is_empty() => (key, value),
            _ => {
                return Grouped {
                    emitted: None,
                    invalid: true,
                }
            }
        };
        // Blank responses are plentiful; ignore them outright.
        if value.is_empty() {
            return Grouped::default();
        }

        let mut result = Grouped::default();
        if self.current_key.is_empty() {
            self.current_key = key.to_string();
        } else if self.current_key != key {
            result.emitted = self.emit();
            self.current_key = key.to_string();
        }

        if let Some(value) = scrub_value(key, value) {
            self.values.push(value.into_owned());
        }
        result
    }

    /// Emits the final group, if any.
    pub fn finish(&mut self) -> Option<String> {
        let last = self.emit();
        self.current_key.clear();
        last
    }

    fn emit(&mut self) -> Option<String> {
        if self.values.is_empty() {
            return None;
        }
        // Tails may themselves be groupings from an earlier pass; re-split
        // before deduplicating.
        let mut seen = HashSet::new();
        let mut unique: Vec<&str> = Vec::with_capacity(self.values.len());
        for value in &self.values {
            for piece in value.split(RECORD_SEPARATOR) {
                if !piece.is_empty() && seen.insert(piece) {
                    unique.push(piece);
                }
            }
        }
        let line = format!(
            "{},{}",
            self.current_key,
            unique.join(&RECORD_SEPARATOR.to_string())
        );
        self.values.clear();
        Some(line)
    }
}

/// Value-level scrubs applied as lines accumulate: self-referential
/// records, TXT artifacts.
fn scrub_value<'a>(key: &str, value: &'a str) -> Option<Cow<'a, str>> {
    // Records whose payload points back at their own key carry nothing
    // (NS records legitimately do this).
    if value.len() >= key.len() {
        if let Some((tag, tail)) = value.split_once(',') {
            if tag != "ns" && (tail.is_empty() || tail == key) {
                return None;
            }
        }
    }

    // TXT records sometimes start with an erroneous pipe byte.
    if let Some(rest) = value.strip_prefix("txt,|") {
        return Some(Cow::Owned(format!("txt,{rest}")));
    }

    // DNSSEC-related TXT records often carry trailing bytes.
    if value.len() >= 38
        && (value.starts_with("txt,31") || value.starts_with("txt,00") || value.starts_with("txt,aa"))
    {
        return Some(Cow::Borrowed(&value[..38]));
    }

    // Mangled TXT values carry nothing.
    if (5..=10).contains(&value.len()) && value.starts_with("txt,~") {
        return None;
    }

    Some(Cow::Borrowed(value))
}
