use super::split_names;
use crate::parser::page::Page;
use crate::parser::strategy::{first_success, Strategy};
use crate::record::PatentRecord;

const INVENTOR_LABELS: &[&str] = &["Inventor(s)", "Inventors", "Inventor"];
const ASSIGNEE_LABELS: &[&str] = &[
    "Current Assignee",
    "Original Assignee",
    "Assignee(s)",
    "Assignees",
    "Assignee",
    "Applicant(s)",
    "Applicants",
    "Applicant",
];
// Page chrome that leaks into labeled assignee text.
const ASSIGNEE_NOISE: &[&str] = &["google", "patents", "legal", "analysis", "search"];

pub fn extract(page: &Page, rec: &mut PatentRecord) {
    let meta = &mut rec.extraction_meta;
    rec.inventors = first_success("inventors", &inventor_strategies(), page, meta).unwrap_or_default();
    rec.assignees = first_success("assignees", &assignee_strategies(), page, meta).unwrap_or_default();
}

fn inventor_strategies() -> Vec<Strategy<Vec<String>>> {
    vec![
        Strategy::new("itemprop_inventor", |p| Some(p.all_text("dd[itemprop='inventor']"))),
        Strategy::new("dc_contributor_inventor", |p| {
            Some(p.all_attr("meta[name='DC.contributor'][scheme='inventor']", "content"))
        }),
        Strategy::new("inventor_class", |p| Some(p.all_text(".inventor"))),
        Strategy::new("inventor_label", |p| {
            p.labeled_values(INVENTOR_LABELS)
                .map(|v| split_names(&v))
                .find(|names| !names.is_empty())
        }),
    ]
}

fn assignee_strategies() -> Vec<Strategy<Vec<String>>> {
    vec![
        Strategy::new("itemprop_assignee_current", |p| {
            Some(p.all_text("dd[itemprop='assigneeCurrent']"))
        }),
        Strategy::new("itemprop_assignee_original", |p| {
            Some(p.all_text("dd[itemprop='assigneeOriginal']"))
        }),
        Strategy::new("dc_contributor_assignee", |p| {
            Some(p.all_attr("meta[name='DC.contributor'][scheme='assignee']", "content"))
        }),
        Strategy::new("organisation_link", |p| Some(p.all_text(".organisation a"))),
        Strategy::new("assignee_class", |p| Some(p.all_text(".assignee"))),
        Strategy::new("assignee_label", |p| {
            p.labeled_values(ASSIGNEE_LABELS)
                .map(|v| {
                    split_names(&v)
                        .into_iter()
                        .filter(|n| !is_noise(n))
                        .collect::<Vec<_>>()
                })
                .find(|names| !names.is_empty())
        }),
    ]
}

fn is_noise(name: &str) -> bool {
    let lower = name.to_lowercase();
    ASSIGNEE_NOISE.iter().any(|w| lower.split_whitespace().any(|t| t == *w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ExtractionMeta, FieldSource};
    use chrono::Utc;

    fn run(html: &str) -> PatentRecord {
        let page = Page::parse("https://example.org/doc", html);
        let mut rec = PatentRecord::empty("u", Utc::now(), ExtractionMeta::default());
        extract(&page, &mut rec);
        rec
    }

    #[test]
    fn itemprop_entries_keep_source_order_and_duplicates() {
        let rec = run(
            r#"<dl><dd itemprop="inventor">Zoe Ark</dd><dd itemprop="inventor">Al Bo</dd>
               <dd itemprop="inventor">Zoe Ark</dd></dl>"#,
        );
        assert_eq!(rec.inventors, vec!["Zoe Ark", "Al Bo", "Zoe Ark"]);
    }

    #[test]
    fn contributor_metas_split_by_scheme() {
        let rec = run(
            r#"<meta name="DC.contributor" content="Jane Roe" scheme="inventor">
               <meta name="DC.contributor" content="Acme Corp" scheme="assignee">"#,
        );
        assert_eq!(rec.inventors, vec!["Jane Roe"]);
        assert_eq!(rec.assignees, vec!["Acme Corp"]);
        assert_eq!(
            rec.extraction_meta.fields["assignees"],
            FieldSource::Matched("dc_contributor_assignee".into())
        );
    }

    #[test]
    fn labeled_assignees_drop_page_chrome() {
        let rec = run("<p>Assignee: Acme Corp, Google Patents</p>");
        assert_eq!(rec.assignees, vec!["Acme Corp"]);
    }

    #[test]
    fn no_people_is_a_gap_not_an_error() {
        let rec = run("<p>nothing</p>");
        assert!(rec.inventors.is_empty());
        assert_eq!(rec.extraction_meta.fields["inventors"], FieldSource::Missing);
    }

    #[test]
    fn chrome_only_label_falls_through_to_the_next_one() {
        let rec = run("<p>Assignee: Google Patents</p><p>Assignee: Acme Corp</p>");
        assert_eq!(rec.assignees, vec!["Acme Corp"]);
    }
}
