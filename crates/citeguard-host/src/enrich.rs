//! Prompt enrichment: the verified-content template and the input sanitiser.

use citeguard_core::SectionRecord;
use tracing::warn;

/// Label in front of the user's (sanitised) question inside an enriched query.
pub const QUESTION_MARKER: &str = "USER'S QUESTION:";

/// First line after the question block; ends it.
const ANSWER_DIRECTIVE: &str = "YOU ARE NOW ANSWERING BASED ON THE VERIFIED DATABASE CONTENT ABOVE.";

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

const INJECTION_MARKERS: &[&str] = &[
    "ignore previous",
    "ignore all previous",
    "disregard",
    "system:",
    "assistant:",
    "###",
    "override",
    "bypass",
];

/// Make user text safe to embed in the enrichment template.
///
/// Truncates to `max_chars`, neutralises code fences and template braces, and
/// logs (but keeps) phrases commonly used for prompt injection.
pub fn sanitize_user_input(text: &str, max_chars: usize) -> String {
    let truncated: String = if text.chars().count() > max_chars {
        warn!(max_chars, "user input truncated");
        text.chars().take(max_chars).collect()
    } else {
        text.to_string()
    };

    let escaped = truncated
        .replace("```", "'''")
        .replace('{', "{{")
        .replace('}', "}}");

    let lower = escaped.to_lowercase();
    for marker in INJECTION_MARKERS {
        if lower.contains(marker) {
            warn!(marker, "possible prompt injection in user input");
        }
    }

    escaped.trim().to_string()
}

/// Undo the escapes applied by [`sanitize_user_input`].
pub fn unsanitize(text: &str) -> String {
    text.replace("{{", "{")
        .replace("}}", "}")
        .replace("'''", "```")
}

/// Render one verified section for injection.
pub fn format_section(record: &SectionRecord, include_history: bool) -> String {
    let location = record
        .hierarchy
        .breadcrumb()
        .unwrap_or_else(|| "N/A".to_string());
    let mut block = format!(
        "{RULE}\n**California {} § {}**\nLocation: {location}\n\n{}\n",
        record.code.title(),
        record.section,
        record.body.trim()
    );
    if include_history {
        if let Some(history) = record.legislative_history.as_deref() {
            block.push_str(&format!("\nLegislative History: {history}\n"));
        }
    }
    block
}

/// Build the enriched query handed to generation.
///
/// `question` must already be sanitised. `records` must be non-empty; the
/// first record names the code the answer has to lead with.
pub fn build_enriched_query(
    records: &[SectionRecord],
    question: &str,
    include_history: bool,
) -> String {
    let queries: String = records
        .iter()
        .map(|r| format!("Query: code='{}' AND section='{}'\n", r.code, r.section))
        .collect();
    let context: String = records
        .iter()
        .map(|r| format_section(r, include_history))
        .collect::<Vec<_>>()
        .join("\n");

    let (lead_title, lead_section) = records
        .first()
        .map(|r| (r.code.title(), r.section.as_str()))
        .unwrap_or_default();

    format!(
        "Based on the official California Legal Codes Database query:\n\n\
         DATABASE SEARCH PERFORMED:\n\
         {queries}\
         Status: FOUND ✓\n\
         Result: {count} verified section(s)\n\n\
         VERIFIED DATABASE CONTENT:\n\
         {context}\n\
         {RULE}\n\n\
         {QUESTION_MARKER} {question}\n\n\
         {ANSWER_DIRECTIVE}\n\n\
         Your response must begin with: \"California {lead_title} Section {lead_section}\"\n\n\
         Do NOT mention any other code. Do NOT say this section belongs to a different code.\n\n\
         Now provide your answer using ONLY the verified content above:",
        count = records.len(),
    )
}

/// Recover the user's original question from an enriched query.
///
/// Returns `None` when `text` does not carry the question block.
pub fn recover_question(text: &str) -> Option<String> {
    let start = text.find(QUESTION_MARKER)? + QUESTION_MARKER.len();
    let rest = &text[start..];
    let end = rest.find(ANSWER_DIRECTIVE).unwrap_or(rest.len());
    let question = rest[..end].trim();
    if question.is_empty() {
        None
    } else {
        Some(unsanitize(question))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use citeguard_core::{CodeId, Hierarchy};

    fn record() -> SectionRecord {
        SectionRecord {
            code: CodeId::Pen,
            section: "187".into(),
            code_name: "Penal".into(),
            body: "Murder is the unlawful killing of a human being.".into(),
            legislative_history: Some("Amended by Stats. 1996.".into()),
            source_url: String::new(),
            hierarchy: Hierarchy {
                division: None,
                part: Some("1".into()),
                chapter: Some("1".into()),
                article: None,
            },
            retrieved_at: Utc::now(),
            is_multi_version: false,
            versions: vec![],
            updated_at: None,
        }
    }

    #[test]
    fn sanitizer_escapes_and_trims() {
        let out = sanitize_user_input("  explain ```rm -rf``` and {x}  ", 10_000);
        assert_eq!(out, "explain '''rm -rf''' and {{x}}");
    }

    #[test]
    fn sanitizer_truncates_by_chars() {
        let out = sanitize_user_input(&"§".repeat(20), 5);
        assert_eq!(out.chars().count(), 5);
    }

    #[test]
    fn section_block_has_header_location_and_history() {
        let block = format_section(&record(), true);
        assert!(block.contains("**California Penal Code § 187**"));
        assert!(block.contains("Location: Part 1 > Chapter 1"));
        assert!(block.contains("Legislative History: Amended by Stats. 1996."));

        let block = format_section(&record(), false);
        assert!(!block.contains("Legislative History"));
    }

    #[test]
    fn unknown_location_is_na() {
        let mut r = record();
        r.hierarchy = Hierarchy::default();
        assert!(format_section(&r, false).contains("Location: N/A"));
    }

    #[test]
    fn enriched_query_embeds_content_and_question() {
        let question = sanitize_user_input("What does Penal Code Section 187 say?", 10_000);
        let text = build_enriched_query(&[record()], &question, true);
        assert!(text.contains("Query: code='PEN' AND section='187'"));
        assert!(text.contains("Murder is the unlawful killing"));
        assert!(text.contains("USER'S QUESTION: What does Penal Code Section 187 say?"));
        assert!(text.contains("Your response must begin with: \"California Penal Code Section 187\""));
    }

    #[test]
    fn question_recovery_undoes_escapes() {
        let original = "What does {PEN} 187 mean?\nAlso see ```this```";
        let text = build_enriched_query(&[record()], &sanitize_user_input(original, 10_000), true);
        assert_eq!(recover_question(&text).as_deref(), Some(original));
    }

    #[test]
    fn plain_text_has_no_question() {
        assert!(recover_question("What does Penal Code 187 say?").is_none());
    }
}
