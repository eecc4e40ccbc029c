//! Detection of generated text that denies or misattributes a verified section.
//!
//! The phrase table is data: each entry is a regex template instantiated per
//! verified record. Placeholders:
//!
//! - `{code}`: the record's code name, lower-case ("penal", "evidence")
//! - `{section}`: the section number, matched up to a word boundary
//! - `{other_code}`: any supported code name other than the record's own
//!
//! Matching is case-insensitive.

use citeguard_core::{CodeId, GuardConfig, SectionRecord};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TEMPLATES: &[&str] = &[
    // Negation
    r"there is no {code} code section {section}",
    r"there is no {code} section {section}",
    r"there is no section {section} in the {code} code",
    r"section {section} does not exist",
    r"no such section as {section}",
    // Access denial
    r"cannot (?:provide|access)[^.\n]{0,80}section {section}",
    // Misattribution
    r"section {section} (?:belongs to|is part of) the {other_code} code",
    r"this section is in the {other_code} code",
    // Self-correction
    r"this is incorrect",
    r"this is wrong",
    r"the database is mistaken",
];

#[derive(Debug, Error)]
pub enum ContradictionError {
    #[error("invalid contradiction template {template:?}: {source}")]
    InvalidTemplate {
        template: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ContradictionTable {
    templates: Vec<String>,
}

impl Default for ContradictionTable {
    fn default() -> Self {
        Self {
            templates: DEFAULT_TEMPLATES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl ContradictionTable {
    /// Build a table, rejecting templates that do not compile.
    pub fn new(templates: Vec<String>) -> Result<Self, ContradictionError> {
        for template in &templates {
            compile(template, CodeId::Pen, "1")?;
        }
        Ok(Self { templates })
    }

    /// The configured table, or the built-in one when none is configured.
    pub fn from_config(config: &GuardConfig) -> Result<Self, ContradictionError> {
        match &config.contradiction_templates {
            Some(templates) => Self::new(templates.clone()),
            None => Ok(Self::default()),
        }
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    /// The first template that matches `text` for `record`, if any.
    pub fn find(&self, text: &str, record: &SectionRecord) -> Option<&str> {
        self.templates.iter().map(String::as_str).find(|template| {
            match compile(template, record.code, &record.section) {
                Ok(re) => re.is_match(text),
                Err(err) => {
                    warn!(error = %err, "skipping contradiction template");
                    false
                }
            }
        })
    }

    /// The first record, in order, that `text` contradicts.
    pub fn first_contradicted<'a>(
        &self,
        text: &str,
        records: &'a [SectionRecord],
    ) -> Option<&'a SectionRecord> {
        records.iter().find(|record| match self.find(text, record) {
            Some(template) => {
                debug!(
                    code = %record.code,
                    section = %record.section,
                    template,
                    "contradiction template matched"
                );
                true
            }
            None => false,
        })
    }
}

fn compile(template: &str, code: CodeId, section: &str) -> Result<Regex, ContradictionError> {
    let others = CodeId::ALL
        .iter()
        .filter(|c| **c != code)
        .map(|c| regex::escape(&c.display_name().to_lowercase()))
        .collect::<Vec<_>>()
        .join("|");

    let pattern = template
        .replace("{code}", &regex::escape(&code.display_name().to_lowercase()))
        .replace("{section}", &format!(r"{}\b", regex::escape(section)))
        .replace("{other_code}", &format!("(?:{others})"));

    Regex::new(&format!("(?i){pattern}")).map_err(|source| ContradictionError::InvalidTemplate {
        template: template.to_string(),
        source,
    })
}

/// Replacement response built from a verified record.
pub fn correction_text(record: &SectionRecord) -> String {
    let title = record.code.title();
    let section = &record.section;
    let body = if record.body.trim().is_empty() {
        "Content not available"
    } else {
        record.body.trim()
    };
    format!(
        "**⚠️ VALIDATION SYSTEM OVERRIDE ⚠️**\n\n\
         The AI model's response contradicted verified database information. \
         Here is the **CORRECT** information directly from the California Legal Codes Database:\n\n\
         **California {title} Section {section} ✓** (VERIFIED)\n\n\
         {body}\n\n\
         ---\n\n\
         **Database Verification:**\n\
         - Query: `code='{code}' AND section='{section}'`\n\
         - Status: FOUND ✓ in the official California {title}\n\
         - This section exists in the {title}\n\n\
         **Note:** The original response stated that this section did not exist or belonged \
         to a different code. It has been replaced with the authoritative text.",
        code = record.code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use citeguard_core::Hierarchy;

    fn record(code: CodeId, section: &str) -> SectionRecord {
        SectionRecord {
            code,
            section: section.into(),
            code_name: code.display_name().into(),
            body: "A witness may be cross-examined...".into(),
            legislative_history: None,
            source_url: String::new(),
            hierarchy: Hierarchy::default(),
            retrieved_at: Utc::now(),
            is_multi_version: false,
            versions: vec![],
            updated_at: None,
        }
    }

    #[test]
    fn default_templates_compile() {
        let defaults = DEFAULT_TEMPLATES.iter().map(|t| t.to_string()).collect();
        assert!(ContradictionTable::new(defaults).is_ok());
    }

    #[test]
    fn explicit_negation_matches_case_insensitively() {
        let table = ContradictionTable::default();
        let evid = record(CodeId::Evid, "761");
        assert!(
            table
                .find("I'm sorry, but There Is No Evidence Code section 761.", &evid)
                .is_some()
        );
        assert!(table.find("Section 761 does not exist.", &evid).is_some());
    }

    #[test]
    fn section_boundary_is_respected() {
        let table = ContradictionTable::default();
        let pen = record(CodeId::Pen, "18");
        assert!(table.find("section 187 does not exist", &pen).is_none());
    }

    #[test]
    fn misattribution_requires_another_code() {
        let table = ContradictionTable::default();
        let pen = record(CodeId::Pen, "187");
        assert!(
            table
                .find("Section 187 belongs to the Family Code, not the Penal Code.", &pen)
                .is_some()
        );
        assert!(
            table
                .find("Section 187 is part of the Penal Code.", &pen)
                .is_none()
        );
    }

    #[test]
    fn access_denial() {
        let table = ContradictionTable::default();
        let civ = record(CodeId::Civ, "1714");
        assert!(
            table
                .find("I cannot provide the full text of Civil Code section 1714", &civ)
                .is_some()
        );
    }

    #[test]
    fn faithful_answer_does_not_match() {
        let table = ContradictionTable::default();
        let evid = record(CodeId::Evid, "761");
        let reply = "California Evidence Code Section 761 defines cross-examination.";
        assert!(table.find(reply, &evid).is_none());
    }

    #[test]
    fn first_contradicted_follows_record_order() {
        let table = ContradictionTable::default();
        let records = vec![record(CodeId::Pen, "187"), record(CodeId::Evid, "761")];
        let hit = table
            .first_contradicted("there is no evidence code section 761", &records)
            .unwrap();
        assert_eq!(hit.code, CodeId::Evid);
    }

    #[test]
    fn custom_templates_from_config() {
        let config = GuardConfig {
            contradiction_templates: Some(vec![r"{code} code has no section {section}".into()]),
            ..Default::default()
        };
        let table = ContradictionTable::from_config(&config).unwrap();
        assert_eq!(table.templates().len(), 1);
        let fam = record(CodeId::Fam, "3011");
        assert!(table.find("The family code has no section 3011.", &fam).is_some());
    }

    #[test]
    fn invalid_template_is_rejected() {
        let err = ContradictionTable::new(vec!["section {section} (unclosed".into()]).unwrap_err();
        assert!(matches!(err, ContradictionError::InvalidTemplate { .. }));
    }

    #[test]
    fn correction_is_built_from_record() {
        let text = correction_text(&record(CodeId::Evid, "761"));
        assert!(text.contains("**California Evidence Code Section 761 ✓** (VERIFIED)"));
        assert!(text.contains("A witness may be cross-examined..."));
        assert!(text.contains("code='EVID' AND section='761'"));
    }
}
