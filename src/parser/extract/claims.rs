use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use crate::parser::page::{element_text, Page};
use crate::parser::strategy::{first_success, Strategy};
use crate::record::PatentRecord;

static CLAIM_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(\d{1,3})\.").unwrap());

pub fn extract(page: &Page, rec: &mut PatentRecord) {
    rec.claims = first_success("claims", &strategies(), page, &mut rec.extraction_meta)
        .unwrap_or_default();
}

fn strategies() -> Vec<Strategy<Vec<String>>> {
    vec![
        Strategy::new("claim_elements", |p| Some(outermost(p, "div.claim", "claim"))),
        Strategy::new("claim_text_elements", |p| {
            Some(outermost(p, ".claim-text", "claim-text"))
        }),
        Strategy::new("numbered_section", |p| {
            let text = p.first_text("section[itemprop='claims'], .claims, [data-claims]")?;
            Some(split_numbered(&text))
        }),
    ]
}

/// Text of each `css` match that is not nested inside another element of
/// `class`; nested claim-text blocks belong to their parent claim.
fn outermost(page: &Page, css: &str, class: &str) -> Vec<String> {
    page.select(css)
        .into_iter()
        .filter(|el| !nested_in(el, class))
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
        .collect()
}

fn nested_in(el: &ElementRef, class: &str) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().classes().any(|c| c == class))
}

/// Split running claim text on its sequential numbering, keeping the numbers.
/// Only the next expected number starts a claim, so "according to claim 1."
/// inside claim 4 does not split it.
pub fn split_numbered(text: &str) -> Vec<String> {
    let mut starts = Vec::new();
    let mut expected = 1u32;
    for caps in CLAIM_NUMBER_RE.captures_iter(text) {
        let (Some(all), Some(num)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // "1." must be followed by whitespace, so "1.5 mm" is not a claim
        if !text[all.end()..].chars().next().map_or(true, char::is_whitespace) {
            continue;
        }
        if num.as_str().parse::<u32>().ok() == Some(expected) {
            starts.push(num.start());
            expected += 1;
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            text[start..end].trim().to_string()
        })
        .filter(|c| !c.is_empty())
        .collect()
}
