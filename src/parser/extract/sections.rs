//! Optional page sections. Each one is checked for presence first so that a
//! page without, say, a citations table yields `null` rather than `[]`.

use std::sync::LazyLock;

use regex::Regex;

use super::{dedup, patent_numbers};
use crate::parser::dates::parse_date;
use crate::parser::page::{attr_in, text_in, Page};
use crate::parser::strategy::{section_success, Presence, Strategy};
use crate::record::{normalize_identifier, LegalEvent, PatentRecord};

static CLASSIFICATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-H]\d{2}[A-Z]\s?\d{1,4}/\d{2,6}\b").unwrap());
static EVENT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\s*[:\-–]?\s*(.+)$").unwrap()
});

const LEGAL_STATUS: Presence = Presence {
    selectors: &[
        "[itemprop='legalStatusIfi']",
        "[itemprop='status']",
        ".legal-status",
        ".status",
        "[data-status]",
    ],
    labels: &["Legal status", "Status"],
};
const CLASSIFICATIONS: Presence = Presence {
    selectors: &[
        "[itemprop='classifications']",
        ".classification",
        ".ipc-codes",
        "[data-classification]",
    ],
    labels: &["Classifications", "IPC"],
};
const FAMILY: Presence = Presence {
    selectors: &[
        "[itemprop='docdbFamily']",
        ".family-members",
        ".patent-family",
        "[data-family]",
    ],
    labels: &["Family members", "Patent family"],
};
const CITED: Presence = Presence {
    selectors: &[
        "[itemprop='backwardReferences']",
        "[itemprop='backwardReferencesOrig']",
        "[itemprop='backwardReferencesFamily']",
        ".cited-patents",
        ".references",
        "[data-cited]",
    ],
    labels: &["Patent Citations", "Cited patents"],
};
const CITING: Presence = Presence {
    selectors: &[
        "[itemprop='forwardReferences']",
        "[itemprop='forwardReferencesOrig']",
        "[itemprop='forwardReferencesFamily']",
        ".citing-patents",
        ".cited-by",
        "[data-citing]",
    ],
    labels: &["Cited By"],
};
const LEGAL_EVENTS: Presence = Presence {
    selectors: &["[itemprop='legalEvents']", ".legal-events", ".timeline"],
    labels: &["Legal Events"],
};

pub fn extract(page: &Page, rec: &mut PatentRecord) {
    let meta = &mut rec.extraction_meta;
    rec.legal_status =
        section_success("legal_status", &LEGAL_STATUS, &status_strategies(), page, meta)
            .into_value();
    rec.classification_codes = section_success(
        "classification_codes",
        &CLASSIFICATIONS,
        &classification_strategies(),
        page,
        meta,
    )
    .into_list();
    rec.family_members = section_success(
        "family_members",
        &FAMILY,
        &numbers(
            "itemprop_family",
            "[itemprop='docdbFamily'] [itemprop='publicationNumber']",
            ".family-members, .patent-family, [data-family]",
        ),
        page,
        meta,
    )
    .into_list();
    rec.cited_patents = section_success(
        "cited_patents",
        &CITED,
        &numbers(
            "itemprop_backward_references",
            "[itemprop='backwardReferences'] [itemprop='publicationNumber'], \
             [itemprop='backwardReferencesOrig'] [itemprop='publicationNumber'], \
             [itemprop='backwardReferencesFamily'] [itemprop='publicationNumber']",
            ".cited-patents, .references, [data-cited]",
        ),
        page,
        meta,
    )
    .into_list();
    rec.citing_patents = section_success(
        "citing_patents",
        &CITING,
        &numbers(
            "itemprop_forward_references",
            "[itemprop='forwardReferences'] [itemprop='publicationNumber'], \
             [itemprop='forwardReferencesOrig'] [itemprop='publicationNumber'], \
             [itemprop='forwardReferencesFamily'] [itemprop='publicationNumber']",
            ".citing-patents, .cited-by, [data-citing]",
        ),
        page,
        meta,
    )
    .into_list();
    rec.legal_events =
        section_success("legal_events", &LEGAL_EVENTS, &event_strategies(), page, meta).into_list();
}

fn status_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("itemprop_legal_status", |p| {
            p.first_text("[itemprop='legalStatusIfi'] [itemprop='status']")
        }),
        Strategy::new("itemprop_status", |p| p.first_text("[itemprop='status']")),
        Strategy::new("status_class", |p| {
            p.first_text(".legal-status, .status, [data-status]")
        }),
        Strategy::new("status_label", |p| p.labeled_value(&["Legal status", "Status"])),
    ]
}

fn classification_strategies() -> Vec<Strategy<Vec<String>>> {
    vec![
        // Google lists every level of the hierarchy; only full group codes carry a '/'.
        Strategy::new("itemprop_classifications", |p| {
            let codes = p
                .all_text("[itemprop='classifications'] [itemprop='Code']")
                .into_iter()
                .filter(|c| c.contains('/'))
                .map(|c| c.replace(' ', ""))
                .collect();
            Some(dedup(codes))
        }),
        Strategy::new("classification_scan", |p| {
            let text = p
                .all_text(".classification, .ipc-codes, [data-classification]")
                .join(" ");
            let codes = CLASSIFICATION_RE
                .find_iter(&text)
                .map(|m| m.as_str().replace(' ', ""))
                .collect();
            Some(dedup(codes))
        }),
    ]
}

/// Structured publication-number cells first, then a number scan over the
/// section's text.
fn numbers(
    structured_name: &'static str,
    structured_css: &'static str,
    section_css: &'static str,
) -> Vec<Strategy<Vec<String>>> {
    vec![
        Strategy::new(structured_name, move |p| {
            let ids = p
                .all_text(structured_css)
                .iter()
                .map(|t| normalize_identifier(t))
                .collect();
            Some(dedup(ids))
        }),
        Strategy::new("number_scan", move |p| {
            Some(patent_numbers(&p.all_text(section_css).join(" ")))
        }),
    ]
}

fn event_strategies() -> Vec<Strategy<Vec<LegalEvent>>> {
    vec![
        Strategy::new("itemprop_legal_events", |p| {
            let events = p
                .select("[itemprop='legalEvents']")
                .iter()
                .filter_map(|row| {
                    let event = text_in(row, "[itemprop='title']")?;
                    let date = attr_in(row, "time[itemprop='date']", "datetime")
                        .or_else(|| text_in(row, "[itemprop='date']"))
                        .and_then(|d| parse_date(&d));
                    Some(LegalEvent { date, event })
                })
                .collect();
            Some(events)
        }),
        Strategy::new("timeline_lines", |p| {
            let events = p
                .all_text(".legal-events li, .timeline li")
                .iter()
                .filter_map(|line| {
                    let caps = EVENT_LINE_RE.captures(line)?;
                    Some(LegalEvent {
                        date: parse_date(&caps[1]),
                        event: caps[2].trim().to_string(),
                    })
                })
                .collect();
            Some(events)
        }),
    ]
}
