use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Parsed markup plus a line view of its visible text.
pub struct Page {
    pub source_url: String,
    html: Html,
    lines: Vec<String>,
}

impl Page {
    pub fn parse(source_url: &str, markup: &str) -> Self {
        Self::from_html(source_url, Html::parse_document(markup))
    }

    /// Parse a fragment, e.g. one row of a listing table.
    pub fn fragment(source_url: &str, markup: &str) -> Self {
        Self::from_html(source_url, Html::parse_fragment(markup))
    }

    fn from_html(source_url: &str, html: Html) -> Self {
        let lines = visible_lines(&html);
        Page {
            source_url: source_url.to_string(),
            html,
            lines,
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn full_text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }

    pub fn has(&self, css: &str) -> bool {
        selector(css).is_some_and(|s| self.html.select(&s).next().is_some())
    }

    pub fn has_any(&self, selectors: &[&str]) -> bool {
        selectors.iter().any(|css| self.has(css))
    }

    /// Collapsed text of the first element matching `css`, if non-empty.
    pub fn first_text(&self, css: &str) -> Option<String> {
        let sel = selector(css)?;
        self.html
            .select(&sel)
            .map(|el| element_text(&el))
            .find(|t| !t.is_empty())
    }

    /// Collapsed text of every element matching `css`, in document order.
    pub fn all_text(&self, css: &str) -> Vec<String> {
        match selector(css) {
            Some(sel) => self
                .html
                .select(&sel)
                .map(|el| element_text(&el))
                .filter(|t| !t.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn first_attr(&self, css: &str, attr: &str) -> Option<String> {
        let sel = selector(css)?;
        self.html
            .select(&sel)
            .filter_map(|el| el.value().attr(attr))
            .map(collapse)
            .find(|v| !v.is_empty())
    }

    pub fn all_attr(&self, css: &str, attr: &str) -> Vec<String> {
        match selector(css) {
            Some(sel) => self
                .html
                .select(&sel)
                .filter_map(|el| el.value().attr(attr))
                .map(collapse)
                .filter(|v| !v.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn select<'a>(&'a self, css: &str) -> Vec<ElementRef<'a>> {
        match selector(css) {
            Some(sel) => self.html.select(&sel).collect(),
            None => Vec::new(),
        }
    }

    /// True if some text line starts with one of `labels`.
    pub fn has_label(&self, labels: &[&str]) -> bool {
        self.lines
            .iter()
            .any(|line| labels.iter().any(|l| strip_label(line, l).is_some()))
    }

    /// Value following the first matching label. See [`Page::labeled_values`].
    pub fn labeled_value(&self, labels: &[&str]) -> Option<String> {
        self.labeled_values(labels).next()
    }

    /// Every value following a label: the rest of the line after `Label:`, or
    /// the next line when the label stands alone (`<dt>`/`<dd>`). Labels are
    /// tried in order, lines in document order within each label.
    pub fn labeled_values<'a>(
        &'a self,
        labels: &'a [&'a str],
    ) -> impl Iterator<Item = String> + 'a {
        labels.iter().flat_map(move |label| {
            self.lines.iter().enumerate().filter_map(move |(i, line)| {
                let rest = strip_label(line, label)?;
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
                self.lines.get(i + 1).cloned()
            })
        })
    }
}

/// `line` minus a leading `label` (case-insensitive), when the label is a whole
/// word followed by nothing, whitespace or a colon.
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let n = label.len();
    if line.len() < n || !line.is_char_boundary(n) || !line[..n].eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = &line[n..];
    match rest.chars().next() {
        None => Some(""),
        Some(c) if c == ':' || c.is_whitespace() => {
            Some(rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace()))
        }
        _ => None,
    }
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(s) => Some(s),
        Err(e) => {
            debug!(css, error = ?e, "Bad selector");
            None
        }
    }
}

/// Collapsed text of the first descendant of `el` matching `css`.
pub fn text_in(el: &ElementRef, css: &str) -> Option<String> {
    let sel = selector(css)?;
    el.select(&sel).map(|e| element_text(&e)).find(|t| !t.is_empty())
}

pub fn attr_in(el: &ElementRef, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    el.select(&sel)
        .filter_map(|e| e.value().attr(attr))
        .map(collapse)
        .find(|v| !v.is_empty())
}

pub fn element_text(el: &ElementRef) -> String {
    collapse(&el.text().collect::<Vec<_>>().join(" "))
}

pub fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text nodes, one collapsed line each, skipping scripts and styles.
fn visible_lines(html: &Html) -> Vec<String> {
    let mut lines = Vec::new();
    for node in html.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        if hidden {
            continue;
        }
        for raw in text.lines() {
            let line = collapse(raw);
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }
    lines
}
