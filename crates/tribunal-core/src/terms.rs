//! Term extraction and set-overlap similarity.
//!
//! Shared by the prefilter and the context packer. Terms are lowercase
//! tokens; tokens keep `+`, `#`, `.` and `-` inside words so `c++`, `c#`,
//! `node.js` and `ci-cd` survive extraction intact.

use std::collections::{BTreeSet, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A word, optionally joined by `.`, `-` or `/` to further word parts.
    static ref TOKEN_PATTERN: Regex = Regex::new(
        r"[\p{L}\p{N}][\p{L}\p{N}+#]*(?:[.\-/][\p{L}\p{N}+#]+)*"
    ).unwrap();

    static ref STOPWORDS: HashSet<&'static str> = [
        "a", "an", "and", "are", "as", "at", "be", "by", "de", "for", "from", "has", "have",
        "in", "into", "is", "it", "its", "of", "on", "or", "our", "the", "their", "to",
        "was", "we", "were", "with", "within", "et", "la", "le", "les", "des", "du", "en",
        "using", "used", "use", "via", "per", "all", "also", "other", "over", "new",
    ]
    .into_iter()
    .collect();
}

/// Tokenize text into lowercase terms, dropping stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| is_significant(t))
        .collect()
}

fn is_significant(token: &str) -> bool {
    if STOPWORDS.contains(token) {
        return false;
    }
    // Single letters only carry meaning as language names ("c", "r").
    token.chars().count() > 1 || matches!(token, "c" | "r")
}

/// Normalize a keyword or skill to its comparable form.
pub fn normalize_term(term: &str) -> String {
    tokenize(term).join(" ")
}

/// Terms extracted from one or more text fragments.
#[derive(Debug, Clone, Default)]
pub struct TermSet {
    tokens: BTreeSet<String>,
    /// Token stream with fragment breaks, padded for phrase matching
    text: String,
}

impl TermSet {
    pub fn from_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tokens = BTreeSet::new();
        let mut text = String::from(" ");
        for fragment in fragments {
            let fragment_tokens = tokenize(fragment);
            if fragment_tokens.is_empty() {
                continue;
            }
            text.push_str(&fragment_tokens.join(" "));
            text.push_str(" | ");
            tokens.extend(fragment_tokens);
        }
        Self { tokens, text }
    }

    pub fn from_text(text: &str) -> Self {
        Self::from_fragments(std::iter::once(text))
    }

    pub fn tokens(&self) -> &BTreeSet<String> {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether a normalized keyword occurs in these terms.
    ///
    /// Single-token keywords match a token; multi-token keywords must appear
    /// as a contiguous phrase within one fragment.
    pub fn contains_keyword(&self, keyword: &str) -> bool {
        let parts: Vec<&str> = keyword.split(' ').filter(|p| !p.is_empty()).collect();
        match parts.len() {
            0 => false,
            1 => self.tokens.contains(parts[0]),
            _ => self.text.contains(&format!(" {} ", parts.join(" "))),
        }
    }

    /// Keywords from `keywords` present in these terms.
    pub fn matched<'k>(&self, keywords: &'k BTreeSet<String>) -> Vec<&'k str> {
        keywords
            .iter()
            .filter(|k| self.contains_keyword(k))
            .map(String::as_str)
            .collect()
    }
}

/// Normalize a keyword list into a set, dropping empty entries.
pub fn keyword_set<'a>(keywords: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    keywords
        .into_iter()
        .map(|k| normalize_term(k))
        .filter(|k| !k.is_empty())
        .collect()
}

/// Fraction of `keywords` found in `terms`.
///
/// Returns `None` for an empty keyword set, where no judgement is possible.
pub fn keyword_coverage(terms: &TermSet, keywords: &BTreeSet<String>) -> Option<f64> {
    if keywords.is_empty() {
        return None;
    }
    Some(terms.matched(keywords).len() as f64 / keywords.len() as f64)
}

/// Overlap coefficient `|A ∩ B| / min(|A|, |B|)` between terms and keywords.
pub fn overlap_coefficient(terms: &TermSet, keywords: &BTreeSet<String>) -> f64 {
    let smaller = terms.len().min(keywords.len());
    if smaller == 0 {
        return 0.0;
    }
    (terms.matched(keywords).len() as f64 / smaller as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| normalize_term(s)).collect()
    }

    #[test]
    fn test_tokenize_keeps_language_names() {
        let tokens = tokenize("Built C++ and C# services with Node.js, Go and the CI-CD pipeline");
        assert!(tokens.contains(&"c++".to_string()));
        assert!(tokens.contains(&"c#".to_string()));
        assert!(tokens.contains(&"node.js".to_string()));
        assert!(tokens.contains(&"ci-cd".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
    }

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("  Systems   Programming "), "systems programming");
        assert_eq!(normalize_term("The"), "");
    }

    #[test]
    fn test_phrase_matching_stays_within_fragment() {
        let terms = TermSet::from_fragments(["Distributed systems", "Programming in Rust"]);
        assert!(terms.contains_keyword("rust"));
        assert!(terms.contains_keyword("distributed systems"));
        assert!(!terms.contains_keyword("systems programming"));
    }

    #[test]
    fn test_keyword_coverage() {
        let terms = TermSet::from_text("Rust developer with Tokio experience");
        let keywords = set(&["rust", "tokio", "kubernetes", "aws"]);
        assert_eq!(keyword_coverage(&terms, &keywords), Some(0.5));
        assert_eq!(keyword_coverage(&terms, &BTreeSet::new()), None);
    }

    #[test]
    fn test_overlap_coefficient() {
        let terms = TermSet::from_text("Rust");
        let keywords = set(&["rust", "tokio", "kubernetes"]);
        assert_eq!(overlap_coefficient(&terms, &keywords), 1.0);
        assert_eq!(overlap_coefficient(&TermSet::default(), &keywords), 0.0);
    }
}
