//! Classifying protein function annotations.

use regex::RegexSet;

/// Decides whether a function annotation describes an uncharacterised protein.
///
/// Implementations must be pure: the same string always gives the same answer.
pub trait FunctionClassifier {
    fn is_hypothetical(&self, function: &str) -> bool;
}

impl<F> FunctionClassifier for F
where
    F: Fn(&str) -> bool,
{
    fn is_hypothetical(&self, function: &str) -> bool {
        self(function)
    }
}

/// Patterns for annotations that carry no functional information.
const HYPOTHETICAL_PATTERNS: &[&str] = &[
    r"hypothetical",
    r"uncharacteri[sz]ed",
    r"unknown function",
    r"function unknown",
    r"^(putative |conserved |predicted )*(phage )?protein$",
    r"^(gp|orf)[0-9]+[a-z]?$",
    r"^duf[0-9]+",
    r"^$",
];

/// A [`FunctionClassifier`] matching common hypothetical protein phrasing,
/// case insensitively.
#[derive(Debug, Clone)]
pub struct HypotheticalMatcher {
    patterns: RegexSet,
}

impl HypotheticalMatcher {
    /// Builds a matcher from custom patterns, matched against the lowercased
    /// and trimmed annotation.
    pub fn with_patterns(patterns: &[&str]) -> Result<Self, regex::Error> {
        Ok(HypotheticalMatcher {
            patterns: RegexSet::new(patterns)?,
        })
    }
}

impl Default for HypotheticalMatcher {
    fn default() -> Self {
        HypotheticalMatcher {
            patterns: RegexSet::new(HYPOTHETICAL_PATTERNS)
                .expect("built-in hypothetical patterns are valid"),
        }
    }
}

impl FunctionClassifier for HypotheticalMatcher {
    fn is_hypothetical(&self, function: &str) -> bool {
        self.patterns
            .is_match(function.trim().to_lowercase().as_str())
    }
}

/// Normalises a GenBank product: first letter upper case, the rest lower
/// case. An empty product becomes `Hypothetical protein`.
pub fn normalise_product(product: &str) -> String {
    let product = product.trim();
    let mut chars = product.chars();
    match chars.next() {
        None => "Hypothetical protein".to_string(),
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
    }
}
