//! Search query grammar: canonical query strings and numeric qualifiers.
//!
//! A canonical query is a sorted, deduplicated list of lowercase terms
//! joined with ` AND `, followed by search qualifiers in a fixed order.
//! Terms containing whitespace or `:` are double-quoted so the search API
//! reads them as phrases rather than qualifiers.
//!
//! ```rust
//! use cae_harvester_core::query::{build_query_string, canonicalize_query};
//!
//! let q = build_query_string(
//!     &["Solver".to_string(), "finite element".to_string()],
//!     &["stars:>=1".to_string()],
//! );
//! assert_eq!(q, r#""finite element" AND solver stars:>=1"#);
//! assert_eq!(canonicalize_query(r#"solver   "Finite Element"  stars:>=1"#), q);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::QualifierError;
use crate::models::normalize_term;

pub const TERM_SEPARATOR: &str = " AND ";

/// Qualifier names in emission order.
const QUALIFIER_ORDER: [&str; 4] = ["stars", "forks", "followers", "topics"];

/// Optional numeric bounds turned into search qualifiers.
///
/// `followers` is what the search API calls watchers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFilters {
    #[serde(default)]
    pub min_stars: Option<i64>,
    #[serde(default)]
    pub max_stars: Option<i64>,
    #[serde(default)]
    pub min_forks: Option<i64>,
    #[serde(default)]
    pub max_forks: Option<i64>,
    #[serde(default)]
    pub min_followers: Option<i64>,
    #[serde(default)]
    pub max_followers: Option<i64>,
    #[serde(default)]
    pub min_topics: Option<i64>,
    #[serde(default)]
    pub max_topics: Option<i64>,
}

impl RepoFilters {
    /// Qualifier strings for every bound that is set.
    pub fn qualifiers(&self) -> Result<Vec<String>, QualifierError> {
        let pairs = [
            ("stars", self.min_stars, self.max_stars),
            ("forks", self.min_forks, self.max_forks),
            ("followers", self.min_followers, self.max_followers),
            ("topics", self.min_topics, self.max_topics),
        ];
        let mut out = Vec::new();
        for (name, min, max) in pairs {
            if let Some(q) = numeric_qualifier(name, min, max)? {
                out.push(q);
            }
        }
        Ok(out)
    }
}

/// Build `name:min..max`, `name:>=min`, or `name:<=max`.
pub fn numeric_qualifier(
    name: &str,
    min: Option<i64>,
    max: Option<i64>,
) -> Result<Option<String>, QualifierError> {
    if min.is_some_and(|v| v < 0) {
        return Err(QualifierError::NegativeMin {
            name: name.to_string(),
        });
    }
    if max.is_some_and(|v| v < 0) {
        return Err(QualifierError::NegativeMax {
            name: name.to_string(),
        });
    }
    Ok(match (min, max) {
        (None, None) => None,
        (Some(lo), Some(hi)) if lo > hi => {
            return Err(QualifierError::Inverted {
                name: name.to_string(),
            })
        }
        (Some(lo), Some(hi)) => Some(format!("{}:{}..{}", name, lo, hi)),
        (Some(lo), None) => Some(format!("{}:>={}", name, lo)),
        (None, Some(hi)) => Some(format!("{}:<={}", name, hi)),
    })
}

/// Quote a normalized term if the search grammar would otherwise split it
/// or read it as a qualifier.
pub fn quote_term(term: &str) -> String {
    if term.contains(char::is_whitespace) || term.contains(':') {
        format!("\"{}\"", term)
    } else {
        term.to_string()
    }
}

/// Assemble the canonical query string from terms and qualifiers.
pub fn build_query_string(terms: &[String], qualifiers: &[String]) -> String {
    let terms: BTreeSet<String> = terms
        .iter()
        .map(|t| normalize_term(&t.replace('"', " ")))
        .filter(|t| !t.is_empty())
        .collect();

    let mut quals: Vec<String> = qualifiers
        .iter()
        .map(|q| q.split_whitespace().collect::<String>().to_lowercase())
        .filter(|q| !q.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    quals.sort_by_key(|q| qualifier_rank(q));

    let mut out = terms
        .iter()
        .map(|t| quote_term(t))
        .collect::<Vec<_>>()
        .join(TERM_SEPARATOR);
    for q in quals {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&q);
    }
    out
}

/// Re-derive the canonical form of any query string.
///
/// Understands double-quoted phrases, bare `AND` operators, and
/// `name:value` qualifiers. Whitespace and term order do not matter.
pub fn canonicalize_query(raw: &str) -> String {
    let mut terms = Vec::new();
    let mut qualifiers = Vec::new();

    for token in tokenize(raw) {
        match token {
            Token::Phrase(text) => terms.push(text),
            Token::Word(word) if word == "AND" => {}
            Token::Word(word) if word.contains(':') => qualifiers.push(word),
            Token::Word(word) => terms.push(word),
        }
    }

    build_query_string(&terms, &qualifiers)
}

fn qualifier_rank(qualifier: &str) -> usize {
    let name = qualifier.split(':').next().unwrap_or_default();
    QUALIFIER_ORDER
        .iter()
        .position(|n| *n == name)
        .unwrap_or(QUALIFIER_ORDER.len())
}

enum Token {
    Phrase(String),
    Word(String),
}

fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut phrase = String::new();
            for ch in chars.by_ref() {
                if ch == '"' {
                    break;
                }
                phrase.push(ch);
            }
            tokens.push(Token::Phrase(phrase));
        } else {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() || ch == '"' {
                    break;
                }
                word.push(ch);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_and_whitespace_do_not_matter() {
        let a = build_query_string(&["fea".into(), "finite-element".into()], &[]);
        let b = build_query_string(&["finite-element".into(), "  FEA ".into()], &[]);
        assert_eq!(a, b);
        assert_eq!(a, "fea AND finite-element");
    }

    #[test]
    fn duplicate_terms_collapse() {
        let q = build_query_string(&["cfd".into(), "CFD".into(), "solver".into()], &[]);
        assert_eq!(q, "cfd AND solver");
    }

    #[test]
    fn multi_word_terms_are_quoted() {
        let q = build_query_string(&["heat transfer".into(), "solver".into()], &[]);
        assert_eq!(q, r#""heat transfer" AND solver"#);
    }

    #[test]
    fn qualifiers_follow_fixed_order() {
        let q = build_query_string(
            &["cfd".into()],
            &["topics:>=1".into(), "stars:>=1".into(), "forks:2..9".into()],
        );
        assert_eq!(q, "cfd stars:>=1 forks:2..9 topics:>=1");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let raw = r#"  solver AND "Heat   Transfer"   cfd  stars:>=1 "#;
        let once = canonicalize_query(raw);
        assert_eq!(once, r#"cfd AND "heat transfer" AND solver stars:>=1"#);
        assert_eq!(canonicalize_query(&once), once);
    }

    #[test]
    fn qualifier_bounds() {
        assert_eq!(numeric_qualifier("stars", None, None), Ok(None));
        assert_eq!(
            numeric_qualifier("stars", Some(1), None),
            Ok(Some("stars:>=1".into()))
        );
        assert_eq!(
            numeric_qualifier("forks", None, Some(5)),
            Ok(Some("forks:<=5".into()))
        );
        assert_eq!(
            numeric_qualifier("topics", Some(1), Some(3)),
            Ok(Some("topics:1..3".into()))
        );
        assert!(matches!(
            numeric_qualifier("stars", Some(5), Some(1)),
            Err(QualifierError::Inverted { .. })
        ));
        assert!(matches!(
            numeric_qualifier("stars", Some(-1), None),
            Err(QualifierError::NegativeMin { .. })
        ));
    }

    #[test]
    fn filters_emit_all_set_bounds() {
        let filters = RepoFilters {
            min_stars: Some(1),
            min_forks: Some(1),
            max_followers: Some(10),
            min_topics: Some(1),
            ..Default::default()
        };
        assert_eq!(
            filters.qualifiers().unwrap(),
            vec!["stars:>=1", "forks:>=1", "followers:<=10", "topics:>=1"]
        );
    }
}
