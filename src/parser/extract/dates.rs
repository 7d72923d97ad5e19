use chrono::NaiveDate;

use crate::parser::dates::parse_date;
use crate::parser::page::{element_text, Page};
use crate::parser::strategy::{first_success, Strategy};
use crate::record::PatentRecord;

struct DateField {
    name: &'static str,
    itemprop: &'static str,
    /// `DC.date` meta scheme carrying the same date, if any.
    dc_scheme: Option<&'static str>,
    labels: &'static [&'static str],
}

static PRIORITY: DateField = DateField {
    name: "priority_date",
    itemprop: "priorityDate",
    dc_scheme: None,
    labels: &["Priority date", "Priority to"],
};
static FILING: DateField = DateField {
    name: "filing_date",
    itemprop: "filingDate",
    dc_scheme: Some("dateSubmitted"),
    labels: &["Filing date", "Application filed", "Filed"],
};
static PUBLICATION: DateField = DateField {
    name: "publication_date",
    itemprop: "publicationDate",
    dc_scheme: Some("issue"),
    labels: &["Publication date", "Published"],
};
static GRANT: DateField = DateField {
    name: "grant_date",
    itemprop: "grantDate",
    dc_scheme: None,
    labels: &["Grant date", "Granted"],
};
static EXPIRATION: DateField = DateField {
    name: "expiration_date",
    itemprop: "expiration",
    dc_scheme: None,
    labels: &["Expiration date", "Anticipated expiration", "Adjusted expiration"],
};

pub fn extract(page: &Page, rec: &mut PatentRecord) {
    let meta = &mut rec.extraction_meta;
    rec.priority_date = first_success(PRIORITY.name, &strategies(&PRIORITY), page, meta);
    rec.filing_date = first_success(FILING.name, &strategies(&FILING), page, meta);
    rec.publication_date = first_success(PUBLICATION.name, &strategies(&PUBLICATION), page, meta);
    rec.grant_date = first_success(GRANT.name, &strategies(&GRANT), page, meta);
    rec.expiration_date = first_success(EXPIRATION.name, &strategies(&EXPIRATION), page, meta);
}

fn strategies(field: &'static DateField) -> Vec<Strategy<NaiveDate>> {
    let mut list = vec![Strategy::new("itemprop_date", move |p| {
        let css = format!("[itemprop='{}']", field.itemprop);
        p.select(&css).iter().find_map(|el| {
            el.value()
                .attr("datetime")
                .and_then(parse_date)
                .or_else(|| parse_date(&element_text(el)))
        })
    })];
    if let Some(scheme) = field.dc_scheme {
        list.push(Strategy::new("dc_date_meta", move |p| {
            let css = format!("meta[name='DC.date'][scheme='{}']", scheme);
            p.first_attr(&css, "content").and_then(|v| parse_date(&v))
        }));
    }
    list.push(Strategy::new("date_label", move |p| {
        p.labeled_values(field.labels).find_map(|v| parse_date(&v))
    }));
    list
}
