//! Registry of the supported California statutory codes.
//!
//! Maps every token a citation may use for a code (full name, four-letter
//! abbreviation, two-letter common abbreviation) onto a canonical [`CodeId`],
//! and back onto the display name used in prompts and corrections.
//!
//! # Token forms
//!
//! - Full name: "Penal", "Code of Civil Procedure"
//! - Database abbreviation: PEN, CIV, CCP, FAM, GOV, CORP, PROB, EVID
//! - Common abbreviation: PC, CC, FC, GC, EC

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical identifier of a supported code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CodeId {
    Pen,
    Civ,
    Ccp,
    Fam,
    Gov,
    Corp,
    Prob,
    Evid,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported code token: {0:?}")]
pub struct UnknownCode(pub String);

impl CodeId {
    pub const ALL: [CodeId; 8] = [
        CodeId::Pen,
        CodeId::Civ,
        CodeId::Ccp,
        CodeId::Fam,
        CodeId::Gov,
        CodeId::Corp,
        CodeId::Prob,
        CodeId::Evid,
    ];

    /// Abbreviation used as the datastore key ("PEN", "CCP", ...).
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::Pen => "PEN",
            Self::Civ => "CIV",
            Self::Ccp => "CCP",
            Self::Fam => "FAM",
            Self::Gov => "GOV",
            Self::Corp => "CORP",
            Self::Prob => "PROB",
            Self::Evid => "EVID",
        }
    }

    /// Human-readable name as it appears in "California <name> Code".
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pen => "Penal",
            Self::Civ => "Civil",
            Self::Ccp => "Code of Civil Procedure",
            Self::Fam => "Family",
            Self::Gov => "Government",
            Self::Corp => "Corporations",
            Self::Prob => "Probate",
            Self::Evid => "Evidence",
        }
    }

    /// Full title for prose: "Penal Code", but "Code of Civil Procedure".
    pub fn title(&self) -> String {
        match self {
            Self::Ccp => self.display_name().to_string(),
            other => format!("{} Code", other.display_name()),
        }
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

impl FromStr for CodeId {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize_code_token(s).ok_or_else(|| UnknownCode(s.to_string()))
    }
}

/// Resolve a raw code token to its canonical code.
///
/// Case-insensitive; internal runs of whitespace are collapsed, so
/// "Code  of civil\nProcedure" resolves to [`CodeId::Ccp`].
pub fn normalize_code_token(token: &str) -> Option<CodeId> {
    let folded = token
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();

    let code = match folded.as_str() {
        "penal" | "pen" | "pc" => CodeId::Pen,
        "civil" | "civ" | "cc" => CodeId::Civ,
        "code of civil procedure" | "civil procedure" | "ccp" => CodeId::Ccp,
        "family" | "fam" | "fc" => CodeId::Fam,
        "government" | "gov" | "gc" => CodeId::Gov,
        "corporations" | "corp" => CodeId::Corp,
        "probate" | "prob" => CodeId::Prob,
        "evidence" | "evid" | "ec" => CodeId::Evid,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_names_resolve() {
        assert_eq!(normalize_code_token("Penal"), Some(CodeId::Pen));
        assert_eq!(normalize_code_token("EVIDENCE"), Some(CodeId::Evid));
        assert_eq!(
            normalize_code_token("Code of  Civil\nProcedure"),
            Some(CodeId::Ccp)
        );
    }

    #[test]
    fn abbreviations_resolve() {
        assert_eq!(normalize_code_token("pc"), Some(CodeId::Pen));
        assert_eq!(normalize_code_token("CC"), Some(CodeId::Civ));
        assert_eq!(normalize_code_token("Corp"), Some(CodeId::Corp));
        assert_eq!(normalize_code_token("ec"), Some(CodeId::Evid));
    }

    #[test]
    fn unknown_tokens_rejected() {
        assert_eq!(normalize_code_token("vehicle"), None);
        assert_eq!(normalize_code_token(""), None);
        assert!("HSC".parse::<CodeId>().is_err());
    }

    #[test]
    fn abbreviation_roundtrips_through_from_str() {
        for code in CodeId::ALL {
            assert_eq!(code.abbreviation().parse::<CodeId>(), Ok(code));
            assert_eq!(code.display_name().parse::<CodeId>(), Ok(code));
        }
    }

    #[test]
    fn serde_uses_abbreviation() {
        let json = serde_json::to_string(&CodeId::Evid).unwrap();
        assert_eq!(json, "\"EVID\"");
        let parsed: CodeId = serde_json::from_str("\"CCP\"").unwrap();
        assert_eq!(parsed, CodeId::Ccp);
    }

    #[test]
    fn titles() {
        assert_eq!(CodeId::Pen.title(), "Penal Code");
        assert_eq!(CodeId::Ccp.title(), "Code of Civil Procedure");
    }
}
