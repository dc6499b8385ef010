use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::fold::fold;

/// How many values a field keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Multiple,
}

/// Result of matching submitted values against an option catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    /// Canonical spellings, in submission order.
    pub matched: Vec<String>,
    /// Submitted values that matched nothing, as submitted.
    pub rejected: Vec<String>,
}

impl Normalized {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Map submitted `values` onto the canonical spellings in `allowed`.
///
/// An empty catalog means free text: every value passes through unchanged,
/// whatever the cardinality. With a catalog, single-select keeps the first
/// match only and multi-select keeps every match once, in submission order.
pub fn normalize<S: AsRef<str>>(
    values: &[S],
    allowed: &[String],
    cardinality: Cardinality,
) -> Normalized {
    if allowed.is_empty() {
        return Normalized {
            matched: values.iter().map(|v| v.as_ref().to_string()).collect(),
            rejected: Vec::new(),
        };
    }

    let keys: Vec<String> = allowed.iter().map(|option| fold(option)).collect();
    let mut out = Normalized::default();
    let mut seen: HashSet<usize> = HashSet::new();

    for value in values {
        let value = value.as_ref();
        let key = fold(value);
        match keys.iter().position(|candidate| *candidate == key) {
            Some(index) => {
                let keep = match cardinality {
                    Cardinality::Single => out.matched.is_empty(),
                    Cardinality::Multiple => seen.insert(index),
                };
                if keep {
                    out.matched.push(allowed[index].clone());
                }
            }
            None => out.rejected.push(value.to_string()),
        }
    }

    out
}
