//! Exclusion filter: slaves we never touch.
//!
//! Patterns come from the `[exclude]` section of the config. A slave is
//! excluded when any pattern appears anywhere in its name (case-sensitive).

/// A pre-loaded set of substring patterns.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    patterns: Vec<String>,
}

impl Exclusions {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| name.contains(pattern.as_str()))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}
