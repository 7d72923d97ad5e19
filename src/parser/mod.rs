pub mod dates;
pub mod extract;
pub mod listing;
pub mod page;
pub mod strategy;

use tracing::debug;

use crate::fetcher::RawDocument;
use crate::record::{ExtractionMeta, PatentRecord};
use page::Page;

pub use listing::extract_listing;

/// Markup → best-effort record. Never fails: fields no strategy could read are
/// left empty and marked `missing` in the record's provenance.
pub fn extract(doc: &RawDocument) -> PatentRecord {
    let page = Page::parse(&doc.url, &doc.body);
    let mut rec = PatentRecord::empty(&doc.url, doc.retrieved_at, ExtractionMeta::for_content(&doc.body));
    extract::extract_all(&page, &mut rec);
    debug!(
        url = %doc.url,
        identifier = %rec.identifier,
        gaps = ?rec.extraction_meta.gaps(),
        "Extracted"
    );
    rec
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Reference;
    use crate::record::FieldSource;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn doc(id: &str, body: String) -> RawDocument {
        RawDocument {
            reference: Reference::Identifier(id.into()),
            url: format!("https://patents.google.com/patent/{}/en", id),
            status: 200,
            byte_len: body.len(),
            body,
            retrieved_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn us_fixture_core_fields() {
        let rec = extract(&doc("US20210129107", fixture("US20210129107")));
        assert_eq!(rec.identifier, "US20210129107");
        assert_eq!(
            rec.title.as_deref(),
            Some("Compositions and methods for the amplification of nucleic acids")
        );
        assert_eq!(rec.inventors, vec!["JianBing Fan"]);
        assert_eq!(rec.filing_date, ymd(2020, 11, 16));
        assert_eq!(rec.priority_date, ymd(2019, 11, 18));
        assert_eq!(rec.publication_date, ymd(2021, 5, 6));
        assert_eq!(rec.grant_date, None);
    }

    #[test]
    fn us_fixture_sections() {
        let rec = extract(&doc("US20210129107", fixture("US20210129107")));
        assert_eq!(rec.claims.len(), 3);
        assert!(rec.claims[0].starts_with("1. A method"));
        assert_eq!(rec.claims[1], "2. (canceled)");
        assert_eq!(rec.legal_status.as_deref(), Some("Pending"));
        assert_eq!(
            rec.classification_codes,
            Some(vec!["C12Q1/6844".to_string(), "C12Q2521/101".to_string()])
        );
        assert_eq!(
            rec.cited_patents,
            Some(vec!["US5455166A".to_string(), "WO2015002813A1".to_string()])
        );
        assert_eq!(rec.citing_patents, Some(vec!["US11873530B2".to_string()]));
        assert_eq!(rec.family_members, None);
        assert_eq!(rec.extraction_meta.fields["family_members"], FieldSource::Absent);
        let events = rec.legal_events.as_deref().unwrap_or_default();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].date, ymd(2020, 11, 16));
        assert_eq!(rec.assignees, vec!["Illumina, Inc."]);
        assert!(rec.abstract_text.as_deref().unwrap_or_default().starts_with("Provided herein"));
    }

    #[test]
    fn labeled_fixture_uses_text_strategies() {
        let rec = extract(&RawDocument {
            url: "https://register.example.org/EP3456789".into(),
            ..doc("EP3456789", fixture("EP3456789"))
        });
        assert_eq!(rec.identifier, "EP3456789B1");
        assert_eq!(
            rec.extraction_meta.fields["identifier"],
            FieldSource::Matched("publication_number_label".into())
        );
        assert_eq!(rec.title.as_deref(), Some("Method for producing a composite material"));
        assert_eq!(rec.inventors, vec!["MÜLLER Hans", "Schmidt, Anna", "Dupont Marie"]);
        assert_eq!(rec.assignees, vec!["Acme Composites GmbH"]);
        assert_eq!(rec.filing_date, ymd(2018, 3, 14));
        assert_eq!(rec.publication_date, ymd(2019, 3, 20));
        assert_eq!(rec.grant_date, ymd(2017, 1, 5));
        assert_eq!(rec.legal_status.as_deref(), Some("Granted"));
        assert_eq!(rec.claims.len(), 3);
        assert_eq!(rec.claims[2], "3. (deleted)");
        assert_eq!(rec.cited_patents, None);
    }

    #[test]
    fn extraction_is_idempotent() {
        let body = fixture("US20210129107");
        let a = serde_json::to_string(&extract(&doc("US20210129107", body.clone()))).unwrap();
        let b = serde_json::to_string(&extract(&doc("US20210129107", body))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn removing_one_section_changes_only_that_field() {
        let full = fixture("US20210129107");
        let without: String = full
            .lines()
            .filter(|l| !l.contains("inventor") && !l.contains("Inventor"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut a = extract(&doc("US20210129107", full));
        let mut b = extract(&doc("US20210129107", without));
        assert_eq!(a.inventors, vec!["JianBing Fan"]);
        assert!(b.inventors.is_empty());
        assert_eq!(b.extraction_meta.fields["inventors"], FieldSource::Missing);

        for rec in [&mut a, &mut b] {
            rec.inventors.clear();
            rec.extraction_meta = ExtractionMeta::default();
        }
        assert_eq!(a, b);
    }

    #[test]
    fn garbage_markup_still_returns_a_record() {
        let rec = extract(&RawDocument {
            url: "https://example.org/unknown".into(),
            ..doc("XX0", "<<<not html".into())
        });
        assert_eq!(rec.identifier, "");
        assert!(rec.title.is_none());
        assert!(!rec.extraction_meta.gaps().is_empty());
    }
}
