//! Query validation and normalization.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::KgError;

pub const MAX_QUERY_CHARS: usize = 1000;

/// Tokens shorter than this are not worth indexing.
const MIN_INDEX_TOKEN_CHARS: usize = 3;

lazy_static! {
    static ref DANGEROUS_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("<script", Regex::new(r"(?i)<script").unwrap()),
        ("javascript:", Regex::new(r"(?i)javascript:").unwrap()),
        ("on…=", Regex::new(r"(?i)on\w+\s*=").unwrap()),
        ("eval(", Regex::new(r"(?i)eval\(").unwrap()),
        ("expression(", Regex::new(r"(?i)expression\(").unwrap()),
    ];
    static ref ORGANIZATION_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryViolation {
    Empty,
    TooLong(usize),
    DangerousPattern(&'static str),
}

impl std::fmt::Display for QueryViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Query must not be empty"),
            Self::TooLong(n) => write!(f, "Query too long: {} characters (max {})", n, MAX_QUERY_CHARS),
            Self::DangerousPattern(p) => write!(f, "Query contains a forbidden pattern: {}", p),
        }
    }
}

impl From<QueryViolation> for KgError {
    fn from(v: QueryViolation) -> Self {
        KgError::InvalidInput(v.to_string())
    }
}

/// Check a raw query. Length is counted in characters, not bytes.
pub fn validate_query(query: &str, max_chars: usize) -> Result<(), QueryViolation> {
    if query.trim().is_empty() {
        return Err(QueryViolation::Empty);
    }
    let len = query.chars().count();
    if len > max_chars {
        return Err(QueryViolation::TooLong(len));
    }
    for (label, pattern) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(query) {
            return Err(QueryViolation::DangerousPattern(label));
        }
    }
    Ok(())
}

pub fn validate_organization_id(org: &str) -> Result<(), KgError> {
    if ORGANIZATION_ID.is_match(org) {
        Ok(())
    } else {
        Err(KgError::invalid(format!("invalid organization id '{}'", org)))
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_query(query: &str) -> String {
    WHITESPACE.replace_all(query.trim(), " ").to_lowercase()
}

/// Lowercased word tokens, split on whitespace and ASCII punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Distinct tokens eligible for the cache keyword index.
pub fn index_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= MIN_INDEX_TOKEN_CHARS)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_blank() {
        assert_eq!(validate_query("", MAX_QUERY_CHARS), Err(QueryViolation::Empty));
        assert_eq!(validate_query("   \n", MAX_QUERY_CHARS), Err(QueryViolation::Empty));
    }

    #[test]
    fn test_length_counts_chars() {
        let jp = "検".repeat(MAX_QUERY_CHARS);
        assert!(validate_query(&jp, MAX_QUERY_CHARS).is_ok());

        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert_eq!(
            validate_query(&long, MAX_QUERY_CHARS),
            Err(QueryViolation::TooLong(MAX_QUERY_CHARS + 1))
        );
    }

    #[test]
    fn test_denylist_case_insensitive() {
        for q in [
            "<SCRIPT>alert(1)</script>",
            "JavaScript:void(0)",
            "img onerror = x",
            "EVAL(foo)",
            "width: expression(1)",
        ] {
            assert!(
                matches!(validate_query(q, MAX_QUERY_CHARS), Err(QueryViolation::DangerousPattern(_))),
                "{} should be rejected",
                q
            );
        }
        assert!(validate_query("evaluation of online search", MAX_QUERY_CHARS).is_ok());
    }

    #[test]
    fn test_normalize_and_tokens() {
        assert_eq!(normalize_query("  Acme   ROBOTICS\tdeal "), "acme robotics deal");
        assert_eq!(index_tokens("The AI deal, the deal!"), vec!["deal", "the"]);
    }

    #[test]
    fn test_organization_id() {
        assert!(validate_organization_id("org-1").is_ok());
        assert!(validate_organization_id("").is_err());
        assert!(validate_organization_id("bad id").is_err());
    }
}
