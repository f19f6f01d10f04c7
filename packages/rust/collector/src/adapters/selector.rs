//! CSS-selector driven adapter.
//!
//! Fields are read with per-source selectors; unset selectors fall back to
//! the first heading (title) and the first link (detail URL).

use jobharvest_shared::{FieldSelectors, HarvestError, RawRecord, Result, normalize_whitespace};
use scraper::{ElementRef, Html, Selector};

use super::ExtractionAdapter;
use crate::surface::ItemHandle;

const DEFAULT_TITLE_SELECTOR: &str = "h1, h2, h3, h4, [data-title]";
const DEFAULT_LINK_SELECTOR: &str = "a[href]";

/// Adapter configured from a source's [`FieldSelectors`].
pub struct SelectorAdapter {
    source_name: String,
    title: Selector,
    link: Selector,
    location: Option<Selector>,
    salary: Option<Selector>,
    tags: Option<Selector>,
}

impl SelectorAdapter {
    /// Compile the selectors for `source_name`. Fails on invalid CSS.
    pub fn new(source_name: impl Into<String>, fields: &FieldSelectors) -> Result<Self> {
        Ok(Self {
            source_name: source_name.into(),
            title: compile(fields.title.as_deref().unwrap_or(DEFAULT_TITLE_SELECTOR))?,
            link: compile(fields.link.as_deref().unwrap_or(DEFAULT_LINK_SELECTOR))?,
            location: fields.location.as_deref().map(compile).transpose()?,
            salary: fields.salary.as_deref().map(compile).transpose()?,
            tags: fields.tags.as_deref().map(compile).transpose()?,
        })
    }

    /// Adapter using only the generic fallbacks.
    pub fn generic(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            title: Selector::parse(DEFAULT_TITLE_SELECTOR).expect("static selector"),
            link: Selector::parse(DEFAULT_LINK_SELECTOR).expect("static selector"),
            location: None,
            salary: None,
            tags: None,
        }
    }
}

impl ExtractionAdapter for SelectorAdapter {
    fn extract(&self, item: &ItemHandle) -> Result<Option<RawRecord>> {
        let doc = Html::parse_fragment(&item.html);

        let Some(title) = first_text(&doc, &self.title) else {
            return Ok(None);
        };

        let detail_url = match doc
            .select(&self.link)
            .find_map(|el| el.value().attr("href"))
            .map(str::trim)
        {
            Some(href) if !href.is_empty() => {
                let mut resolved = item.page_url.join(href).map_err(|e| {
                    HarvestError::extraction(format!("bad href '{href}' for '{title}': {e}"))
                })?;
                resolved.set_fragment(None);
                resolved.to_string()
            }
            _ => String::new(),
        };

        let mut record = RawRecord::new(title, detail_url, self.source_name.as_str());
        record.location = self.location.as_ref().and_then(|s| first_text(&doc, s));
        record.salary = self.salary.as_ref().and_then(|s| first_text(&doc, s));
        if let Some(sel) = &self.tags {
            for tag in doc.select(sel).map(element_text) {
                if !tag.is_empty() && !record.tags.contains(&tag) {
                    record.tags.push(tag);
                }
            }
        }

        Ok(Some(record))
    }

    fn extract_detail(&self, item: &ItemHandle) -> Option<String> {
        let doc = Html::parse_fragment(&item.html);
        let text = normalize_whitespace(&doc.root_element().text().collect::<String>());
        (!text.is_empty()).then_some(text)
    }

    fn name(&self) -> &str {
        "selector"
    }
}

fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| HarvestError::validation(format!("invalid selector '{css}': {e}")))
}

/// Whitespace-normalized text of the first non-empty match.
fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn handle(html: &str) -> ItemHandle {
        ItemHandle {
            html: html.into(),
            page_url: Url::parse("https://jobs.example.com/board/").unwrap(),
        }
    }

    #[test]
    fn generic_extracts_title_and_link() {
        let adapter = SelectorAdapter::generic("example");
        let record = adapter
            .extract(&handle(
                r#"<article><h3>  Senior
                    Rust   Engineer </h3><a href="../jobs/42#apply">View</a></article>"#,
            ))
            .unwrap()
            .expect("record");

        assert_eq!(record.title, "Senior Rust Engineer");
        assert_eq!(record.detail_url, "https://jobs.example.com/jobs/42");
        assert_eq!(record.source_name, "example");
        assert!(record.tags.is_empty());
    }

    #[test]
    fn missing_title_is_skipped() {
        let adapter = SelectorAdapter::generic("example");
        let result = adapter
            .extract(&handle(r#"<article><a href="/jobs/1">Apply</a></article>"#))
            .unwrap();
        assert!(result.is_none());

        let blank = adapter
            .extract(&handle(r#"<article><h2>   </h2></article>"#))
            .unwrap();
        assert!(blank.is_none());
    }

    #[test]
    fn configured_fields_are_read() {
        let fields = FieldSelectors {
            title: Some(".title".into()),
            link: Some("a.details".into()),
            location: Some(".where".into()),
            salary: Some(".pay".into()),
            tags: Some(".tag".into()),
        };
        let adapter = SelectorAdapter::new("acme", &fields).unwrap();
        let record = adapter
            .extract(&handle(
                r#"<div class="card">
                    <span class="title">Data Engineer</span>
                    <a href="/apply">Apply</a>
                    <a class="details" href="/jobs/7">Details</a>
                    <span class="where">Berlin</span>
                    <span class="pay">€70k</span>
                    <span class="tag">python</span><span class="tag">sql</span><span class="tag">python</span>
                </div>"#,
            ))
            .unwrap()
            .expect("record");

        assert_eq!(record.title, "Data Engineer");
        assert_eq!(record.detail_url, "https://jobs.example.com/jobs/7");
        assert_eq!(record.location.as_deref(), Some("Berlin"));
        assert_eq!(record.salary.as_deref(), Some("€70k"));
        assert_eq!(record.tags, vec!["python".to_string(), "sql".to_string()]);
    }

    #[test]
    fn missing_link_leaves_url_empty() {
        let adapter = SelectorAdapter::generic("example");
        let record = adapter
            .extract(&handle("<article><h3>Engineer</h3></article>"))
            .unwrap()
            .expect("record");
        assert!(record.detail_url.is_empty());
    }

    #[test]
    fn invalid_selector_rejected() {
        let fields = FieldSelectors {
            title: Some("h3[".into()),
            ..FieldSelectors::default()
        };
        let err = SelectorAdapter::new("acme", &fields).err().expect("error");
        assert!(err.to_string().contains("invalid selector"));
    }

    #[test]
    fn detail_text_extraction() {
        let adapter = SelectorAdapter::generic("example");
        let text = adapter.extract_detail(&handle(
            "<section><p>We build</p>\n<p>fast   things.</p></section>",
        ));
        assert_eq!(text.as_deref(), Some("We build fast things."));
        assert_eq!(adapter.extract_detail(&handle("<section> </section>")), None);
    }
}
