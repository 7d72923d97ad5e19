use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::parser::page::collapse;
use crate::record::{normalize_identifier, FieldSource, LegalEvent, PatentRecord};

const PAGE_TITLE_SUFFIX: &str = " - Google Patents";

const AUTHORITIES: &[(&str, &str)] = &[
    ("US", "United States"),
    ("WO", "World Intellectual Property Organization"),
    ("EP", "European Patent Office"),
    ("CN", "China"),
    ("JP", "Japan"),
    ("CA", "Canada"),
    ("KR", "South Korea"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("GB", "United Kingdom"),
    ("AU", "Australia"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Quarantined,
}

/// Clean a freshly extracted record and decide whether it is fit for the
/// cleaned collection. Never drops data: inconsistencies become warnings.
pub fn normalize(mut rec: PatentRecord) -> (PatentRecord, Verdict) {
    rec.identifier = normalize_identifier(&rec.identifier);
    rec.title = clean_text(rec.title).map(|t| clean_title(&t)).filter(|t| !t.is_empty());
    rec.authority = clean_text(rec.authority);
    rec.application_number = clean_text(rec.application_number);
    rec.patent_type = clean_text(rec.patent_type);
    rec.abstract_text = clean_text(rec.abstract_text);
    rec.description = clean_text(rec.description);
    rec.legal_status = clean_text(rec.legal_status);

    rec.inventors = clean_list(rec.inventors);
    rec.assignees = clean_list(rec.assignees);
    rec.claims = clean_list(rec.claims);
    rec.prior_art_keywords = clean_list(rec.prior_art_keywords);
    rec.classification_codes = rec.classification_codes.map(clean_list);
    rec.family_members = rec.family_members.map(clean_list);
    rec.cited_patents = rec.cited_patents.map(clean_list);
    rec.citing_patents = rec.citing_patents.map(clean_list);
    rec.legal_events = rec.legal_events.map(clean_events);

    for warning in chronology_warnings(&rec) {
        warn!(identifier = %rec.identifier, %warning, "Validation warning");
        rec.extraction_meta.warnings.push(warning);
    }

    if rec.authority.is_none() {
        if let Some(name) = authority_for(&rec.identifier) {
            rec.authority = Some(name.to_string());
            rec.extraction_meta.record(
                "authority",
                FieldSource::Matched("derived_from_identifier".into()),
            );
        }
    }

    let verdict = if rec.is_valid() {
        Verdict::Valid
    } else {
        Verdict::Quarantined
    };
    (rec, verdict)
}

/// Strip the search-engine suffix and collapse a title repeated back to back,
/// as listing pages render it ("A B C ... A B C ...").
pub fn clean_title(raw: &str) -> String {
    let title = collapse(raw.trim().trim_end_matches(PAGE_TITLE_SUFFIX));
    let words: Vec<&str> = title.split(' ').collect();
    if words.len() > 10 && words.len() % 2 == 0 {
        let (first, second) = words.split_at(words.len() / 2);
        if first == second {
            return first.join(" ");
        }
    }
    title
}

pub fn authority_for(identifier: &str) -> Option<&'static str> {
    let prefix = identifier.get(..2)?;
    AUTHORITIES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(prefix))
        .map(|(_, name)| *name)
}

fn clean_text(value: Option<String>) -> Option<String> {
    value.map(|v| collapse(&v)).filter(|v| !v.is_empty())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .iter()
        .map(|s| collapse(s))
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean_events(events: Vec<LegalEvent>) -> Vec<LegalEvent> {
    events
        .into_iter()
        .map(|e| LegalEvent {
            date: e.date,
            event: collapse(&e.event),
        })
        .filter(|e| !e.event.is_empty())
        .collect()
}

/// Adjacent present dates along priority, filing, publication, grant must not
/// go backwards, and expiration must not precede filing.
fn chronology_warnings(rec: &PatentRecord) -> Vec<String> {
    let chain: Vec<(&str, NaiveDate)> = [
        ("priority_date", rec.priority_date),
        ("filing_date", rec.filing_date),
        ("publication_date", rec.publication_date),
        ("grant_date", rec.grant_date),
    ]
    .into_iter()
    .filter_map(|(name, date)| date.map(|d| (name, d)))
    .collect();

    let mut warnings: Vec<String> = chain
        .windows(2)
        .filter(|pair| pair[1].1 < pair[0].1)
        .map(|pair| {
            format!(
                "{} {} is before {} {}",
                pair[1].0, pair[1].1, pair[0].0, pair[0].1
            )
        })
        .collect();

    if let (Some(filed), Some(expires)) = (rec.filing_date, rec.expiration_date) {
        if expires < filed {
            warnings.push(format!(
                "expiration_date {} is before filing_date {}",
                expires, filed
            ));
        }
    }
    warnings
}
