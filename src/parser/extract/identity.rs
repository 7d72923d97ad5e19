use std::sync::LazyLock;

use regex::Regex;

use crate::fetcher::{IDENTIFIER_RE, PATENT_PATH_RE};
use crate::parser::page::Page;
use crate::parser::strategy::{first_success, Strategy};
use crate::record::{normalize_identifier, PatentRecord};

static TITLE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]{2}\d[0-9A-Z]*)\s*[-–]").unwrap());
static FULL_TEXT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:US|WO|EP|CN|JP)\d{5,}(?:[A-Z]\d?)?\b").unwrap());

const PAGE_TITLE_SUFFIX: &str = " - Google Patents";

pub fn extract(page: &Page, rec: &mut PatentRecord) {
    let meta = &mut rec.extraction_meta;
    rec.identifier = first_success("identifier", &identifier_strategies(), page, meta).unwrap_or_default();
    rec.title = first_success("title", &title_strategies(), page, meta);
    rec.application_number = first_success("application_number", &application_strategies(), page, meta);
    rec.patent_type = first_success("patent_type", &type_strategies(), page, meta);
    rec.authority = first_success("authority", &authority_strategies(), page, meta);
}

/// Normalized identifier, if `raw` looks like one.
pub fn plausible_id(raw: &str) -> Option<String> {
    let id = normalize_identifier(raw);
    IDENTIFIER_RE.is_match(&id).then_some(id)
}

/// Most to least structured.
fn identifier_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("source_url", |p| {
            PATENT_PATH_RE
                .captures(&p.source_url)
                .and_then(|c| plausible_id(&c[1]))
        }),
        Strategy::new("page_title", |p| {
            let title = p.first_text("title")?;
            TITLE_ID_RE.captures(&title).and_then(|c| plausible_id(&c[1]))
        }),
        Strategy::new("itemprop_publication_number", |p| {
            p.first_text("dd[itemprop='publicationNumber']")
                .and_then(|t| plausible_id(&t))
        }),
        Strategy::new("citation_meta", |p| {
            p.first_attr("meta[name='citation_patent_publication_number']", "content")
                .and_then(|t| plausible_id(&t))
        }),
        Strategy::new("publication_number_class", |p| {
            p.first_text(".publication-number").and_then(|t| plausible_id(&t))
        }),
        Strategy::new("publication_number_label", |p| {
            p.labeled_value(&["Publication number", "Publication No."])
                .and_then(|t| plausible_id(&t))
        }),
        Strategy::new("full_text_scan", |p| {
            FULL_TEXT_ID_RE
                .find(&p.full_text())
                .and_then(|m| plausible_id(m.as_str()))
        }),
    ]
}

fn title_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("itemprop_title", |p| p.first_text("[itemprop='title']")),
        Strategy::new("dc_title_meta", |p| p.first_attr("meta[name='DC.title']", "content")),
        Strategy::new("heading", |p| {
            p.first_text("h1").filter(|t| plausible_id(t).is_none())
        }),
        Strategy::new("result_title", |p| p.first_text(".result-title")),
        Strategy::new("page_title", |p| p.first_text("title").map(|t| strip_page_title(&t))),
    ]
}

fn application_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("itemprop_application_number", |p| {
            p.first_text("dd[itemprop='applicationNumber']")
        }),
        Strategy::new("citation_meta", |p| {
            p.first_attr("meta[name='citation_patent_application_number']", "content")
        }),
        Strategy::new("application_label", |p| {
            p.labeled_value(&["Application number", "Application No.", "App. No."])
        }),
    ]
}

fn type_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("ip_type_span", |p| p.first_text(".ip-type span")),
        Strategy::new("ip_type", |p| p.first_text(".ip-type")),
    ]
}

fn authority_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("itemprop_country", |p| p.first_text("dd[itemprop='countryName']")),
        Strategy::new("data_authority", |p| p.first_attr("[data-authority]", "data-authority")),
        Strategy::new("authority_class", |p| p.first_text(".authority")),
    ]
}

/// `"US20210129107A1 - Some title - Google Patents"` becomes `"Some title"`.
fn strip_page_title(raw: &str) -> String {
    let title = raw.trim().trim_end_matches(PAGE_TITLE_SUFFIX).trim();
    match TITLE_ID_RE.find(title) {
        Some(m) => title[m.end()..].trim().to_string(),
        None => title.to_string(),
    }
}
