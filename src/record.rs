use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One patent as persisted. Every field is always serialized: missing scalars
/// are `null`, missing ordered lists are `[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatentRecord {
    pub identifier: String,
    pub source_url: String,
    pub retrieved_at: DateTime<Utc>,
    pub title: Option<String>,
    pub authority: Option<String>,
    pub application_number: Option<String>,
    pub patent_type: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub description: Option<String>,
    pub inventors: Vec<String>,
    pub assignees: Vec<String>,
    pub priority_date: Option<NaiveDate>,
    pub filing_date: Option<NaiveDate>,
    pub publication_date: Option<NaiveDate>,
    pub grant_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub claims: Vec<String>,
    pub prior_art_keywords: Vec<String>,
    /// `None` when the page has no legal status section at all.
    pub legal_status: Option<String>,
    // Section lists: `None` = section absent from the page, `Some([])` = section
    // present but nothing could be read from it.
    pub classification_codes: Option<Vec<String>>,
    pub family_members: Option<Vec<String>>,
    pub cited_patents: Option<Vec<String>>,
    pub citing_patents: Option<Vec<String>>,
    pub legal_events: Option<Vec<LegalEvent>>,
    pub extraction_meta: ExtractionMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalEvent {
    pub date: Option<NaiveDate>,
    pub event: String,
}

/// Where a field's value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Name of the strategy that produced the value.
    Matched(String),
    /// No strategy produced a plausible value (an extraction gap).
    Missing,
    /// The page has no such section.
    Absent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMeta {
    pub fields: BTreeMap<String, FieldSource>,
    pub warnings: Vec<String>,
    /// Raw text kept for values that have no typed slot (e.g. a bare filing year).
    pub notes: BTreeMap<String, String>,
    pub content_length: usize,
    pub content_hash: String,
}

impl ExtractionMeta {
    pub fn for_content(content: &str) -> Self {
        ExtractionMeta {
            content_length: content.len(),
            content_hash: content_hash(content),
            ..Default::default()
        }
    }

    pub fn record(&mut self, field: &str, source: FieldSource) {
        self.fields.insert(field.to_string(), source);
    }

    /// Fields for which no strategy matched.
    pub fn gaps(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, s)| **s == FieldSource::Missing)
            .map(|(f, _)| f.as_str())
            .collect()
    }
}

impl PatentRecord {
    /// A record carrying only provenance, every other field at its empty sentinel.
    pub fn empty(source_url: &str, retrieved_at: DateTime<Utc>, meta: ExtractionMeta) -> Self {
        PatentRecord {
            identifier: String::new(),
            source_url: source_url.to_string(),
            retrieved_at,
            title: None,
            authority: None,
            application_number: None,
            patent_type: None,
            abstract_text: None,
            description: None,
            inventors: Vec::new(),
            assignees: Vec::new(),
            priority_date: None,
            filing_date: None,
            publication_date: None,
            grant_date: None,
            expiration_date: None,
            claims: Vec::new(),
            prior_art_keywords: Vec::new(),
            legal_status: None,
            classification_codes: None,
            family_members: None,
            cited_patents: None,
            citing_patents: None,
            legal_events: None,
            extraction_meta: meta,
        }
    }

    /// Minimal validity: a title or an identifier.
    pub fn is_valid(&self) -> bool {
        !self.identifier.trim().is_empty()
            || self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Canonical dedup key: uppercase, ASCII alphanumerics only.
/// `"us 2021/0129107-a1"` becomes `"US20210129107A1"`.
pub fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
