//! Result pages of the national IP marketplace portal: one page, many rows,
//! each a partial record (no claims, no citations).

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::ElementRef;
use tracing::{debug, info, warn};

use super::dates::parse_date;
use super::extract::identity::plausible_id;
use super::page::{element_text, Page};
use super::strategy::{first_success, Strategy};
use crate::fetcher::RawDocument;
use crate::record::{ExtractionMeta, PatentRecord};
use crate::validate::clean_title;

/// Text shown while the client-side search is still running, or when it found
/// nothing. Either way the page has no rows worth reading.
const PLACEHOLDERS: &[&str] = &["Searching...", "Your search found no results"];

/// Rows containing any of these are portal chrome, not results.
const SKIP_INDICATORS: &[&str] = &[
    "Searching...",
    "Keyword search",
    "Save your search",
    "Collaboration Opportunities",
    "Licensing Opportunity",
    "Your search found no results",
    "Please note that ExploreIP",
];

const ROW_SELECTORS: &[&str] = &["tr", "li", "article", "div.result"];
const MIN_TITLE_CHARS: usize = 10;

static ROW_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:US|WO|EP|CN|JP|CA)\s?\d[\d ]{4,}[A-Z]?\d?\b").unwrap());
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(1[89]|20)\d{2}\b").unwrap());

/// Extract one partial record per result row. Always succeeds; a page with no
/// usable rows yields an empty list.
pub fn extract_listing(doc: &RawDocument) -> Vec<PatentRecord> {
    let page = Page::parse(&doc.url, &doc.body);
    if PLACEHOLDERS.iter().any(|p| page.contains_text(p)) && page.select(".result-title").is_empty()
    {
        warn!(url = %doc.url, "Listing still shows placeholder text, no results read");
        return Vec::new();
    }

    let rows = result_rows(&page);
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let text = element_text(&row);
        if SKIP_INDICATORS.iter().any(|s| text.contains(s)) {
            debug!(row = %truncate(&text, 60), "Skipping portal chrome");
            continue;
        }
        records.push(extract_row(doc, &row));
    }
    info!(url = %doc.url, rows = records.len(), "Listing extracted");
    records
}

/// The first row shape that carries result titles.
fn result_rows(page: &Page) -> Vec<ElementRef<'_>> {
    for css in ROW_SELECTORS {
        let rows: Vec<_> = page
            .select(css)
            .into_iter()
            .filter(|row| has_result_title(row))
            .collect();
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}

fn has_result_title(row: &ElementRef) -> bool {
    row.descendants()
        .filter_map(ElementRef::wrap)
        .any(|e| e.value().classes().any(|c| c == "result-title"))
}

fn extract_row(doc: &RawDocument, row: &ElementRef) -> PatentRecord {
    let html = row.html();
    // Table cells only survive fragment parsing inside a table.
    let markup = if row.value().name() == "tr" {
        format!("<table><tbody>{}</tbody></table>", html)
    } else {
        html.clone()
    };
    let page = Page::fragment(&doc.url, &markup);

    let mut rec = PatentRecord::empty(&doc.url, doc.retrieved_at, ExtractionMeta::for_content(&html));
    let meta = &mut rec.extraction_meta;
    rec.title = first_success("title", &title_strategies(), &page, meta);
    rec.identifier = first_success("identifier", &identifier_strategies(), &page, meta).unwrap_or_default();
    rec.assignees = first_success("assignees", &assignee_strategies(), &page, meta).unwrap_or_default();
    rec.patent_type = first_success("patent_type", &type_strategies(), &page, meta);
    rec.publication_date = first_success("publication_date", &date_added_strategies(), &page, meta);
    rec.description = first_success("description", &description_strategies(), &page, meta);

    if let Some(year) = page
        .first_text(".filed")
        .and_then(|t| YEAR_RE.find(&t).map(|m| m.as_str().to_string()))
    {
        meta.notes.insert("filing_year".into(), year);
    }

    if let Some(url) = detail_url(&doc.url, &page) {
        rec.source_url = url;
    }
    rec
}

fn title_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("result_title", |p| {
            p.first_text(".result-title")
                .filter(|t| !is_chrome(t))
                .map(|t| clean_title(&t))
        }),
        Strategy::new("first_long_line", |p| {
            p.lines()
                .iter()
                .find(|l| l.chars().count() > MIN_TITLE_CHARS && !is_chrome(l))
                .map(|l| clean_title(l))
        }),
    ]
}

fn identifier_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("publication_number_class", |p| {
            p.first_text(".publication-number").and_then(|t| plausible_id(&t))
        }),
        Strategy::new("row_text_scan", |p| {
            ROW_NUMBER_RE
                .find(&p.full_text())
                .and_then(|m| plausible_id(m.as_str()))
        }),
    ]
}

fn assignee_strategies() -> Vec<Strategy<Vec<String>>> {
    vec![Strategy::new("organisation_link", |p| Some(p.all_text(".organisation a")))]
}

fn type_strategies() -> Vec<Strategy<String>> {
    vec![Strategy::new("ip_type_span", |p| p.first_text(".ip-type span"))]
}

fn date_added_strategies() -> Vec<Strategy<chrono::NaiveDate>> {
    vec![Strategy::new("date_added", |p| {
        p.first_text(".date-added").and_then(|t| parse_date(&t))
    })]
}

fn description_strategies() -> Vec<Strategy<String>> {
    vec![Strategy::new("invention_description", |p| {
        p.first_text(".invention-description")
    })]
}

/// Detail link of the row, made absolute against the listing URL.
fn detail_url(base: &str, page: &Page) -> Option<String> {
    let href = page
        .first_attr(".desktop-display", "href")
        .or_else(|| page.first_attr(".result-title a", "href"))?;
    let base = Url::parse(base).ok()?;
    base.join(&href).ok().map(|u| u.to_string())
}

fn is_chrome(text: &str) -> bool {
    SKIP_INDICATORS.iter().any(|s| text.contains(s))
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Reference;
    use chrono::{NaiveDate, Utc};

    const LISTING_URL: &str =
        "https://ised-isde.canada.ca/ipm-mcpi/patents-brevets?page=1&lang=en";

    fn doc(body: &str) -> RawDocument {
        RawDocument {
            reference: Reference::Listing(LISTING_URL.into()),
            url: LISTING_URL.into(),
            status: 200,
            body: body.to_string(),
            byte_len: body.len(),
            retrieved_at: Utc::now(),
        }
    }

    fn fixture() -> String {
        std::fs::read_to_string("tests/fixtures/listing.html").unwrap()
    }

    #[test]
    fn rows_become_partial_records() {
        let recs = extract_listing(&doc(&fixture()));
        assert_eq!(recs.len(), 3);

        let first = &recs[0];
        assert_eq!(
            first.title.as_deref(),
            Some("Adaptive hydrogel scaffold for guided regeneration of peripheral nerve tissue")
        );
        assert_eq!(first.identifier, "CA2987654");
        assert_eq!(first.assignees, vec!["University of Toronto"]);
        assert_eq!(first.patent_type.as_deref(), Some("Patent"));
        assert_eq!(first.publication_date, NaiveDate::from_ymd_opt(2023, 2, 14));
        assert_eq!(first.extraction_meta.notes["filing_year"], "2017");
        assert!(first.filing_date.is_none());
        assert_eq!(
            first.source_url,
            "https://ised-isde.canada.ca/ipm-mcpi/patents-brevets/ip-2987654"
        );

        let second = &recs[1];
        assert_eq!(second.title.as_deref(), Some("Solar-powered desalination unit"));
        assert_eq!(second.identifier, "");
        assert_eq!(second.publication_date, NaiveDate::from_ymd_opt(2022, 3, 3));
    }

    #[test]
    fn row_without_title_or_number_has_neither() {
        let recs = extract_listing(&doc(&fixture()));
        let last = &recs[2];
        assert!(last.title.is_none());
        assert_eq!(last.identifier, "");
        assert!(!last.is_valid());
    }

    #[test]
    fn placeholder_page_yields_nothing() {
        let recs = extract_listing(&doc("<html><body><p>Searching...</p></body></html>"));
        assert!(recs.is_empty());
    }

    #[test]
    fn row_meta_hashes_the_row_not_the_page() {
        let recs = extract_listing(&doc(&fixture()));
        assert_ne!(recs[0].extraction_meta.content_hash, recs[1].extraction_meta.content_hash);
    }
}
