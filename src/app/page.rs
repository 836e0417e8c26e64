//! Fetched HTML pages and the selector queries scrapers run against them.
//!
//! `scraper::Html` is not `Send`, so a `Page` keeps the markup as a string
//! and parses it per query. Query results are plain owned values.

use crate::app::ports::PageFetcher;
use crate::error::{Result, ScraperError};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct Page {
    url: String,
    status: u16,
    html: String,
}

/// An element found on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    /// Text content with whitespace collapsed.
    pub text: String,
    /// Non-empty text nodes, trimmed, in document order.
    pub lines: Vec<String>,
    pub attrs: Vec<(String, String)>,
    pub html: String,
}

impl Located {
    fn from_element(element: ElementRef<'_>) -> Self {
        let lines: Vec<String> = element
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let text = lines.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
        let attrs = element
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            text,
            lines,
            attrs,
            html: element.html(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Queries inside this element. Table parts (`tr`, `td`) lose their own
    /// tag when re-parsed, so select their children instead.
    pub fn locate(&self, selector: &str) -> Result<Vec<Located>> {
        let selector = parse_selector(selector)?;
        let fragment = Html::parse_fragment(&self.html);
        Ok(fragment.select(&selector).map(Located::from_element).collect())
    }
}

impl Page {
    pub fn new(url: impl Into<String>, status: u16, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            html: html.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn title(&self) -> Option<String> {
        self.locate_first("title")
            .ok()
            .flatten()
            .map(|t| t.text)
            .filter(|t| !t.is_empty())
    }

    pub fn locate(&self, selector: &str) -> Result<Vec<Located>> {
        let parsed = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document.select(&parsed).map(Located::from_element).collect())
    }

    pub fn locate_first(&self, selector: &str) -> Result<Option<Located>> {
        let parsed = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        let found = document.select(&parsed).next().map(Located::from_element);
        Ok(found)
    }

    /// Like `locate_first`, but a missing element is an error (and retryable,
    /// since it usually means the page did not render fully).
    pub fn require(&self, selector: &str) -> Result<Located> {
        self.locate_first(selector)?
            .ok_or_else(|| ScraperError::ElementMissing {
                selector: selector.to_string(),
                url: self.url.clone(),
            })
    }

    /// Table-like extraction: for every row, the cells matching `cell_selector`.
    pub fn rows(&self, row_selector: &str, cell_selector: &str) -> Result<Vec<Vec<Located>>> {
        let row_sel = parse_selector(row_selector)?;
        let cell_sel = parse_selector(cell_selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document
            .select(&row_sel)
            .map(|row| row.select(&cell_sel).map(Located::from_element).collect())
            .collect())
    }

    /// The cell following a `th`/`td` whose text is exactly `label`.
    pub fn labeled_cell(&self, label: &str) -> Option<Located> {
        let selector = parse_selector("th, td").ok()?;
        let document = Html::parse_document(&self.html);
        let heading = document.select(&selector).find(|cell| {
            cell.text().collect::<String>().trim() == label
        })?;
        heading
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|sibling| sibling.value().name() == "td")
            .map(Located::from_element)
    }

    /// The element right after the first `selector` match whose own text is
    /// exactly `label`.
    pub fn next_to(&self, selector: &str, label: &str) -> Result<Option<Located>> {
        let parsed = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document
            .select(&parsed)
            .find(|element| own_text(*element) == label)
            .and_then(|element| element.next_siblings().find_map(ElementRef::wrap))
            .map(Located::from_element))
    }

    /// Parent of the first `selector` match whose own text contains `text`.
    pub fn parent_of(&self, selector: &str, text: &str) -> Result<Option<Located>> {
        let parsed = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document
            .select(&parsed)
            .find(|element| own_text(*element).contains(text))
            .and_then(|element| element.parent())
            .and_then(ElementRef::wrap)
            .map(Located::from_element))
    }

    /// Resolves a link relative to this page's URL.
    pub fn resolve(&self, href: &str) -> Option<String> {
        Url::parse(&self.url)
            .and_then(|base| base.join(href))
            .map(String::from)
            .ok()
    }

    /// Absolute URL of the first element matching `selector` that carries
    /// an `href`.
    pub fn next_link(&self, selector: &str) -> Result<Option<String>> {
        Ok(self
            .locate(selector)?
            .iter()
            .filter_map(|link| link.attr("href"))
            .find(|href| !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:"))
            .and_then(|href| self.resolve(href)))
    }
}

/// Text of the element's direct text children, trimmed.
fn own_text(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text().map(|t| String::from(&**t)))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| ScraperError::Selector(selector.to_string()))
}

/// Walks a chain of pages by following a "next page" link.
pub struct Paginator {
    next: Option<String>,
    next_selector: String,
    visited: HashSet<String>,
    pages: usize,
    max_pages: Option<usize>,
}

impl Paginator {
    pub fn new(start_url: impl Into<String>, next_selector: impl Into<String>) -> Self {
        Self {
            next: Some(start_url.into()),
            next_selector: next_selector.into(),
            visited: HashSet::new(),
            pages: 0,
            max_pages: None,
        }
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn pages_seen(&self) -> usize {
        self.pages
    }

    /// Fetches the next page, or `None` when the chain ends, loops back, or
    /// the page limit is reached.
    pub async fn next_page(&mut self, fetcher: &dyn PageFetcher) -> Result<Option<Page>> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        if self.max_pages.map_or(false, |max| self.pages >= max) {
            debug!("Page limit reached before {}", url);
            return Ok(None);
        }
        if !self.visited.insert(url.clone()) {
            debug!("Pagination looped back to {}", url);
            return Ok(None);
        }
        let page = fetcher.navigate(&url).await?;
        self.pages += 1;
        self.next = page.next_link(&self.next_selector)?;
        Ok(Some(page))
    }
}
