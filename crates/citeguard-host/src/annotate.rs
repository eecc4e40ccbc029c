//! Inline verification badges and the citation summary.
//!
//! Annotation is idempotent: [`strip_annotations`] removes every badge and
//! the summary this module adds, so re-annotating already annotated text
//! yields the same text.

use std::fmt::Write as _;
use std::ops::Range;
use std::sync::LazyLock;

use citeguard_core::{CitationMatch, extract_spans};
use regex::Regex;

/// Start of the appended summary block.
pub const SUMMARY_MARKER: &str = "\n\n---\n**Citation check:**";

const VERIFIED_BADGE: &str = " ✓";
const WARNING_BADGE: &str = " ⚠️";

static STRUCK_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~~([^~\n]+?)~~ ⚠️").expect("struck span regex is valid"));

static DIGIT_CHECK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]( ✓)").expect("check badge regex is valid"));

#[derive(Clone, Copy, PartialEq, Eq)]
enum Badge {
    Struck,
    Verified,
}

/// A badge-shaped piece of text and where its remainder lands once removed.
struct Candidate {
    badge: Badge,
    /// Range in the input covered by the badge (the whole `~~…~~ ⚠️`, or ` ✓`).
    outer: Range<usize>,
    /// Struck inner text, kept on removal.
    inner: Range<usize>,
    /// Range the kept text occupies in the badge-free text.
    at: Range<usize>,
}

/// Remove badges and the summary block added by [`annotate`].
///
/// A badge is removed only when it sits on a citation span; a ` ✓` or struck
/// text the model wrote itself is left alone.
pub fn strip_annotations(text: &str) -> String {
    let body = match text.find(SUMMARY_MARKER) {
        Some(i) => &text[..i],
        None => text,
    };

    let mut found: Vec<(Badge, Range<usize>, Range<usize>)> = STRUCK_SPAN
        .captures_iter(body)
        .filter_map(|c| Some((Badge::Struck, c.get(0)?.range(), c.get(1)?.range())))
        .collect();
    found.extend(
        DIGIT_CHECK
            .captures_iter(body)
            .filter_map(|c| c.get(1))
            .map(|m| (Badge::Verified, m.range(), m.end()..m.end())),
    );
    found.sort_by_key(|(_, outer, _)| outer.start);

    // Badge-free text: every candidate removed, so citations re-extract as annotated.
    let mut clean = String::with_capacity(body.len());
    let mut candidates = Vec::new();
    let mut cursor = 0;
    for (badge, outer, inner) in found {
        if outer.start < cursor {
            continue;
        }
        clean.push_str(&body[cursor..outer.start]);
        let start = clean.len();
        clean.push_str(&body[inner.clone()]);
        candidates.push(Candidate {
            badge,
            outer: outer.clone(),
            inner,
            at: start..clean.len(),
        });
        cursor = outer.end;
    }
    if candidates.is_empty() {
        return body.to_string();
    }
    clean.push_str(&body[cursor..]);

    let spans: Vec<Range<usize>> = extract_spans(&clean).into_iter().map(|m| m.span).collect();
    let on_citation = |c: &Candidate| match c.badge {
        Badge::Struck => spans.contains(&c.at),
        Badge::Verified => spans.iter().any(|s| s.end == c.at.start),
    };

    let mut out = String::with_capacity(body.len());
    let mut cursor = 0;
    for candidate in &candidates {
        if on_citation(candidate) {
            out.push_str(&body[cursor..candidate.outer.start]);
            out.push_str(&body[candidate.inner.clone()]);
        } else {
            out.push_str(&body[cursor..candidate.outer.end]);
        }
        cursor = candidate.outer.end;
    }
    out.push_str(&body[cursor..]);
    out
}

/// Badge the first occurrence of each citation and append the summary.
///
/// `verified[i]` is the outcome for `matches[i]`. Spans must index into `text`.
pub fn annotate(text: &str, matches: &[CitationMatch], verified: &[bool]) -> String {
    let mut order: Vec<(&CitationMatch, bool)> = matches
        .iter()
        .zip(verified.iter().copied())
        .collect();
    order.sort_by_key(|(m, _)| m.span.start);

    let mut out = String::with_capacity(text.len() + 256);
    let mut cursor = 0;
    for (m, ok) in order {
        if m.span.start < cursor || m.span.end > text.len() {
            continue;
        }
        out.push_str(&text[cursor..m.span.start]);
        let raw = &text[m.span.clone()];
        if ok {
            out.push_str(raw);
            out.push_str(VERIFIED_BADGE);
        } else {
            let _ = write!(out, "~~{raw}~~{WARNING_BADGE}");
        }
        cursor = m.span.end;
    }
    out.push_str(&text[cursor..]);
    out.push_str(&summary(matches, verified));
    out
}

fn summary(matches: &[CitationMatch], verified: &[bool]) -> String {
    let ok = verified.iter().filter(|v| **v).count();
    let bad = matches.len().saturating_sub(ok);

    let mut s = format!("{SUMMARY_MARKER} {ok} verified ✓ | {bad} unverified ⚠️\n\n");
    s.push_str("| Citation | Status |\n|---|---|\n");
    for (m, v) in matches.iter().zip(verified) {
        let status = if *v { "✓ verified" } else { "⚠️ unverified" };
        let _ = writeln!(s, "| {} | {status} |", m.citation.canonical());
    }
    s
}
