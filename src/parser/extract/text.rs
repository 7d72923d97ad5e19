use super::dedup;
use crate::parser::page::Page;
use crate::parser::strategy::{first_success, Strategy};
use crate::record::PatentRecord;

pub fn extract(page: &Page, rec: &mut PatentRecord) {
    let meta = &mut rec.extraction_meta;
    rec.abstract_text = first_success("abstract", &abstract_strategies(), page, meta);
    rec.description = first_success("description", &description_strategies(), page, meta);
    rec.prior_art_keywords =
        first_success("prior_art_keywords", &keyword_strategies(), page, meta).unwrap_or_default();
}

fn abstract_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("abstract_block", |p| p.first_text("div.abstract")),
        Strategy::new("itemprop_abstract", |p| p.first_text("section[itemprop='abstract']")),
        Strategy::new("dc_description_meta", |p| {
            p.first_attr("meta[name='DC.description']", "content")
        }),
        Strategy::new("data_abstract", |p| p.first_text("[data-abstract]")),
        Strategy::new("summary_class", |p| p.first_text(".summary")),
        Strategy::new("abstract_label", |p| p.labeled_value(&["Abstract"])),
    ]
}

fn description_strategies() -> Vec<Strategy<String>> {
    vec![
        Strategy::new("description_block", |p| p.first_text("div.description")),
        Strategy::new("itemprop_description", |p| {
            p.first_text("section[itemprop='description']")
        }),
        Strategy::new("data_description", |p| p.first_text("[data-description]")),
        Strategy::new("specification_class", |p| p.first_text(".specification")),
        Strategy::new("invention_description", |p| p.first_text(".invention-description")),
    ]
}

fn keyword_strategies() -> Vec<Strategy<Vec<String>>> {
    vec![
        Strategy::new("itemprop_keywords", |p| {
            Some(dedup(p.all_text("dd[itemprop='priorArtKeywords']")))
        }),
        Strategy::new("keywords_label", |p| {
            let raw = p.labeled_value(&["Prior art keywords"])?;
            Some(dedup(raw.split(',').map(|s| s.trim().to_string()).collect()))
        }),
    ]
}
