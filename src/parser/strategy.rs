//! Ordered extraction strategies with first-success-wins and provenance.

use chrono::{Datelike, NaiveDate};
use tracing::trace;

use super::page::Page;
use crate::record::{ExtractionMeta, FieldSource, LegalEvent};

type StrategyFn<T> = Box<dyn Fn(&Page) -> Option<T>>;

/// One named candidate way of reading a field from a page.
pub struct Strategy<T> {
    pub name: &'static str,
    run: StrategyFn<T>,
}

impl<T> Strategy<T> {
    pub fn new(name: &'static str, run: impl Fn(&Page) -> Option<T> + 'static) -> Self {
        Strategy {
            name,
            run: Box::new(run),
        }
    }

    pub fn apply(&self, page: &Page) -> Option<T> {
        (self.run)(page)
    }
}

/// A value that can be judged usable before it is accepted.
pub trait Plausible {
    fn is_plausible(&self) -> bool;
}

impl Plausible for String {
    fn is_plausible(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Plausible for Vec<String> {
    fn is_plausible(&self) -> bool {
        self.iter().any(|s| !s.trim().is_empty())
    }
}

impl Plausible for NaiveDate {
    fn is_plausible(&self) -> bool {
        (1790..=2100).contains(&self.year())
    }
}

impl Plausible for Vec<LegalEvent> {
    fn is_plausible(&self) -> bool {
        !self.is_empty()
    }
}

/// Try `strategies` in order; the first plausible value wins and its strategy
/// name is recorded for `field`. Records `missing` when nothing matches.
pub fn first_success<T: Plausible>(
    field: &str,
    strategies: &[Strategy<T>],
    page: &Page,
    meta: &mut ExtractionMeta,
) -> Option<T> {
    for strategy in strategies {
        match strategy.apply(page) {
            Some(value) if value.is_plausible() => {
                trace!(field, strategy = strategy.name, "Matched");
                meta.record(field, FieldSource::Matched(strategy.name.to_string()));
                return Some(value);
            }
            _ => trace!(field, strategy = strategy.name, "No match"),
        }
    }
    meta.record(field, FieldSource::Missing);
    None
}

/// Outcome for a field backed by an optional page section.
#[derive(Debug, PartialEq)]
pub enum Section<T> {
    Absent,
    Gap,
    Found(T),
}

impl<T: Default> Section<T> {
    /// `None` when absent, the empty value when present but unreadable.
    pub fn into_list(self) -> Option<T> {
        match self {
            Section::Absent => None,
            Section::Gap => Some(T::default()),
            Section::Found(v) => Some(v),
        }
    }
}

impl<T> Section<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Section::Found(v) => Some(v),
            _ => None,
        }
    }
}

/// How to recognise that a page carries a section at all.
pub struct Presence {
    pub selectors: &'static [&'static str],
    pub labels: &'static [&'static str],
}

impl Presence {
    pub fn on(&self, page: &Page) -> bool {
        page.has_any(self.selectors) || page.has_label(self.labels)
    }
}

/// Like [`first_success`], but first checks that the section exists so an
/// omitted section (`absent`) is told apart from a failed read (`missing`).
pub fn section_success<T: Plausible>(
    field: &str,
    presence: &Presence,
    strategies: &[Strategy<T>],
    page: &Page,
    meta: &mut ExtractionMeta,
) -> Section<T> {
    if !presence.on(page) {
        meta.record(field, FieldSource::Absent);
        return Section::Absent;
    }
    match first_success(field, strategies, page, meta) {
        Some(v) => Section::Found(v),
        None => Section::Gap,
    }
}
