//! Section records as returned by an authoritative source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codes::CodeId;

/// One version block of a section that has several operative texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionVersion {
    pub content: String,
    #[serde(default)]
    pub legislative_history: Option<String>,
    /// Operative date as published by the source (free-form, usually ISO 8601).
    #[serde(default)]
    pub operative_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Location of a section inside its code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub division: Option<String>,
    pub part: Option<String>,
    pub chapter: Option<String>,
    pub article: Option<String>,
}

impl Hierarchy {
    /// "Division 1 > Part 1 > Chapter 1", or `None` when nothing is known.
    pub fn breadcrumb(&self) -> Option<String> {
        let parts: Vec<String> = [
            ("Division", &self.division),
            ("Part", &self.part),
            ("Chapter", &self.chapter),
            ("Article", &self.article),
        ]
        .into_iter()
        .filter_map(|(label, v)| v.as_deref().map(|v| format!("{label} {v}")))
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" > "))
        }
    }
}

/// Wire/row shape shared by every section backend.
///
/// Both the HTTP API body and the datastore row decode into this type;
/// [`into_record`](Self::into_record) turns it into a trusted [`SectionRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPayload {
    pub code: String,
    pub section: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub legislative_history: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default)]
    pub chapter: Option<String>,
    #[serde(default)]
    pub article: Option<String>,
    #[serde(default)]
    pub is_multi_version: bool,
    #[serde(default)]
    pub versions: Vec<SectionVersion>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Authoritative body of a statute section plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub code: CodeId,
    pub section: String,
    pub code_name: String,
    /// Section text; for multi-version sections, every version merged with headers.
    pub body: String,
    pub legislative_history: Option<String>,
    pub source_url: String,
    pub hierarchy: Hierarchy,
    pub retrieved_at: DateTime<Utc>,
    pub is_multi_version: bool,
    pub versions: Vec<SectionVersion>,
    pub updated_at: Option<String>,
}

impl SectionPayload {
    /// The code this payload claims to belong to, if it is a supported one.
    pub fn code_id(&self) -> Option<CodeId> {
        self.code.parse().ok()
    }

    /// Convert into a record for `code`.
    ///
    /// Returns `None` when the payload's own code differs from `code`: a
    /// mismatching payload is a corruption signal and must not be trusted.
    pub fn into_record(self, code: CodeId, retrieved_at: DateTime<Utc>) -> Option<SectionRecord> {
        if self.code_id() != Some(code) {
            return None;
        }

        let body = if self.is_multi_version && !self.versions.is_empty() {
            merge_versions(&self.versions)
        } else {
            self.content
        };

        Some(SectionRecord {
            code,
            section: self.section,
            code_name: code.display_name().to_string(),
            body,
            legislative_history: self.legislative_history.filter(|h| !h.trim().is_empty()),
            source_url: self.url.unwrap_or_default(),
            hierarchy: Hierarchy {
                division: self.division,
                part: self.part,
                chapter: self.chapter,
                article: self.article,
            },
            retrieved_at,
            is_multi_version: self.is_multi_version,
            versions: self.versions,
            updated_at: self.updated_at,
        })
    }
}

impl SectionRecord {
    /// Canonical short form, e.g. "CCP 35".
    pub fn canonical(&self) -> String {
        format!("{} {}", self.code, self.section)
    }
}

/// Merge version blocks into one body with a header per version.
///
/// ```text
/// ### Version 1 of 2
/// (operative 2024-01-01, status: active)
///
/// <content>
///
/// Legislative History: <history>
/// ```
pub fn merge_versions(versions: &[SectionVersion]) -> String {
    let total = versions.len();
    versions
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let mut block = format!("### Version {} of {total}", i + 1);

            let mut meta = Vec::new();
            if let Some(date) = v.operative_date.as_deref().filter(|d| !d.is_empty()) {
                meta.push(format!("operative {date}"));
            }
            if let Some(status) = v.status.as_deref().filter(|s| !s.is_empty()) {
                meta.push(format!("status: {status}"));
            }
            if !meta.is_empty() {
                block.push_str(&format!("\n({})", meta.join(", ")));
            }

            block.push_str("\n\n");
            block.push_str(v.content.trim());

            if let Some(history) = v
                .legislative_history
                .as_deref()
                .filter(|h| !h.trim().is_empty())
            {
                block.push_str(&format!("\n\nLegislative History: {history}"));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
