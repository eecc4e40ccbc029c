//! Citation extraction from free text.
//!
//! Four pattern families are matched case-insensitively:
//!
//! 1. Full name: "California Penal Code Section 187", "Evidence Code § 761",
//!    "Code of Civil Procedure 35"
//! 2. Database abbreviation: "PEN 187", "CCP §1234", "CIV 1234.5"
//! 3. Common abbreviation: "PC 187", "CC 1714"
//! 4. Compound list: "Penal Code sections 187, 188 and 189"
//!
//! Matches from every family are merged in textual order and deduplicated by
//! `(code, section)`, keeping the first occurrence.

use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codes::{CodeId, normalize_code_token};

/// Full names that are always followed by the word "Code".
const NAMED_CODES: &str = "Penal|Civil|Family|Government|Corporations|Probate|Evidence";

/// Section token as captured: broad on purpose so malformed numbers are seen
/// and rejected instead of silently truncated.
const SECTION_TOKEN: &str = r"\d[0-9A-Za-z.]*";

/// Strict section number used inside compound lists.
const LIST_NUMBER: &str = r"\d+(?:\.\d+)?\b";

static SECTION_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("section format regex is valid"));

static FULL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:California\s+)?({NAMED_CODES})\s+Code\s+(?:Section\s+)?§?\s*({SECTION_TOKEN})"
    ))
    .expect("full-name citation regex is valid")
});

static CIVIL_PROCEDURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:California\s+)?(Code\s+of\s+Civil\s+Procedure)\s+(?:Section\s+)?§?\s*({SECTION_TOKEN})"
    ))
    .expect("civil procedure citation regex is valid")
});

static ABBREVIATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(PEN|CIV|CCP|FAM|GOV|CORP|PROB|EVID)\s+§?\s*({SECTION_TOKEN})"
    ))
    .expect("abbreviation citation regex is valid")
});

static COMMON_ABBREVIATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(PC|CC|FC|GC|EC)\s+§?\s*({SECTION_TOKEN})"))
        .expect("common abbreviation citation regex is valid")
});

static COMPOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:California\s+)?(?:({NAMED_CODES})\s+Code|(Code\s+of\s+Civil\s+Procedure))\s+sections?\s+§?\s*({LIST_NUMBER}(?:\s*,\s*(?:(?:and|or)\s+)?{LIST_NUMBER}|\s+(?:and|or)\s+{LIST_NUMBER})+)"
    ))
    .expect("compound citation regex is valid")
});

static LIST_MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LIST_NUMBER).expect("list member regex is valid"));

/// A parsed `(code, section)` reference found in text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub code: CodeId,
    pub section: String,
    /// The text that produced this citation, as it appeared in the source.
    pub raw_text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid section number: {0:?}")]
pub struct InvalidSection(pub String);

impl Citation {
    /// Build a citation from already-separated parts, enforcing the section format.
    pub fn new(code: CodeId, section: &str) -> Result<Self, InvalidSection> {
        let section = section.trim();
        if !is_valid_section(section) {
            return Err(InvalidSection(section.to_string()));
        }
        Ok(Self {
            code,
            section: section.to_string(),
            raw_text: format!("{code} {section}"),
        })
    }

    /// Identity used for deduplication and lookups.
    pub fn key(&self) -> (CodeId, &str) {
        (self.code, self.section.as_str())
    }

    /// Canonical short form, e.g. "PEN 187".
    pub fn canonical(&self) -> String {
        format!("{} {}", self.code, self.section)
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.section)
    }
}

/// A citation together with the byte range of its first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationMatch {
    pub citation: Citation,
    pub span: Range<usize>,
}

/// Whether `section` is an integer with at most one decimal group.
pub fn is_valid_section(section: &str) -> bool {
    SECTION_FORMAT.is_match(section)
}

/// Extract unique citations in first-occurrence order.
pub fn extract(text: &str) -> Vec<Citation> {
    extract_spans(text)
        .into_iter()
        .map(|m| m.citation)
        .collect()
}

/// Extract unique citations with the span of their first occurrence.
pub fn extract_spans(text: &str) -> Vec<CitationMatch> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for (family, pattern) in [&*FULL_NAME, &*CIVIL_PROCEDURE, &*ABBREVIATION, &*COMMON_ABBREVIATION]
        .into_iter()
        .enumerate()
    {
        for caps in pattern.captures_iter(text) {
            let (Some(whole), Some(code_tok), Some(section_tok)) =
                (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let section = section_tok.as_str().trim_end_matches('.');
            candidates.push(Candidate {
                start: whole.start(),
                end: section_tok.start() + section.len(),
                family,
                code_token: code_tok.as_str(),
                section,
            });
        }
    }

    for caps in COMPOUND.captures_iter(text) {
        let (Some(whole), Some(list)) = (caps.get(0), caps.get(3)) else {
            continue;
        };
        let Some(code_tok) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        for (i, member) in LIST_MEMBER.find_iter(list.as_str()).enumerate() {
            let member_start = list.start() + member.start();
            candidates.push(Candidate {
                // The first member carries the code name with it.
                start: if i == 0 { whole.start() } else { member_start },
                end: member_start + member.len(),
                family: 4,
                code_token: code_tok.as_str(),
                section: member.as_str(),
            });
        }
    }

    candidates.sort_by_key(|c| (c.start, c.family));

    let mut seen: HashSet<(CodeId, String)> = HashSet::new();
    let mut out = Vec::new();
    for cand in candidates {
        let Some(code) = normalize_code_token(cand.code_token) else {
            debug!(token = cand.code_token, "discarding unsupported code token");
            continue;
        };
        if !is_valid_section(cand.section) {
            debug!(
                code = %code,
                section = cand.section,
                "discarding citation with malformed section number"
            );
            continue;
        }
        if !seen.insert((code, cand.section.to_string())) {
            continue;
        }
        out.push(CitationMatch {
            citation: Citation {
                code,
                section: cand.section.to_string(),
                raw_text: text[cand.start..cand.end].to_string(),
            },
            span: cand.start..cand.end,
        });
    }
    out
}

struct Candidate<'t> {
    start: usize,
    end: usize,
    family: usize,
    code_token: &'t str,
    section: &'t str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(text: &str) -> Vec<(CodeId, String)> {
        extract(text)
            .into_iter()
            .map(|c| (c.code, c.section))
            .collect()
    }

    #[test]
    fn full_name_with_section_word() {
        let found = extract("What does Penal Code Section 187 say?");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, CodeId::Pen);
        assert_eq!(found[0].section, "187");
        assert_eq!(found[0].raw_text, "Penal Code Section 187");
    }

    #[test]
    fn full_name_with_california_prefix_and_symbol() {
        let found = extract("Under California Evidence Code § 761, the witness...");
        assert_eq!(found[0].code, CodeId::Evid);
        assert_eq!(found[0].raw_text, "California Evidence Code § 761");
    }

    #[test]
    fn code_of_civil_procedure_form() {
        assert_eq!(
            keys("See Code of Civil Procedure section 35 for details."),
            vec![(CodeId::Ccp, "35".to_string())]
        );
    }

    #[test]
    fn database_abbreviations() {
        assert_eq!(
            keys("Compare PEN 187, CCP §1234 and civ 1234.5."),
            vec![
                (CodeId::Pen, "187".to_string()),
                (CodeId::Ccp, "1234".to_string()),
                (CodeId::Civ, "1234.5".to_string()),
            ]
        );
    }

    #[test]
    fn common_abbreviations() {
        assert_eq!(
            keys("PC 187 and FC 3011"),
            vec![
                (CodeId::Pen, "187".to_string()),
                (CodeId::Fam, "3011".to_string()),
            ]
        );
    }

    #[test]
    fn compound_list_expands() {
        assert_eq!(
            keys("Penal Code sections 187, 188, and 189 define murder."),
            vec![
                (CodeId::Pen, "187".to_string()),
                (CodeId::Pen, "188".to_string()),
                (CodeId::Pen, "189".to_string()),
            ]
        );
    }

    #[test]
    fn compound_with_or() {
        assert_eq!(
            keys("Family Code sections 3011 or 3020"),
            vec![
                (CodeId::Fam, "3011".to_string()),
                (CodeId::Fam, "3020".to_string()),
            ]
        );
    }

    #[test]
    fn order_is_textual_not_by_pattern() {
        assert_eq!(
            keys("EVID 761 comes after Penal Code 187? No: PC 187 repeats."),
            vec![
                (CodeId::Evid, "761".to_string()),
                (CodeId::Pen, "187".to_string()),
            ]
        );
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let found = extract_spans("PEN 187 ... Penal Code 187 ... pen 187");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].span, 0..7);
    }

    #[test]
    fn malformed_section_discarded() {
        assert!(extract("PEN 187a is not a section").is_empty());
        assert!(extract("CIV 1.2.3").is_empty());
    }

    #[test]
    fn trailing_period_trimmed() {
        let found = extract("The rule is in EVID 761.");
        assert_eq!(found[0].section, "761");
        assert_eq!(found[0].raw_text, "EVID 761");
    }

    #[test]
    fn unsupported_code_names_ignored() {
        assert!(extract("Vehicle Code 23152 and HSC 11350").is_empty());
    }

    #[test]
    fn greedy_prefix_words_do_not_swallow_code_name() {
        assert_eq!(
            keys("tell me what the penal code 187 says"),
            vec![(CodeId::Pen, "187".to_string())]
        );
    }

    #[test]
    fn citation_new_validates() {
        assert!(Citation::new(CodeId::Pen, "187").is_ok());
        assert!(Citation::new(CodeId::Pen, " 1234.5 ").is_ok());
        assert_eq!(
            Citation::new(CodeId::Pen, "abc"),
            Err(InvalidSection("abc".into()))
        );
    }

    #[test]
    fn canonical_form() {
        let c = Citation::new(CodeId::Evid, "761").unwrap();
        assert_eq!(c.canonical(), "EVID 761");
        assert_eq!(c.to_string(), "EVID 761");
    }
}
