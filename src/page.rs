//! Page query capability
//!
//! The harvester only needs three questions answered about a fetched page:
//! which periods an index lists, which items a period listing links to, and
//! what an item's detail page says. [`PageQuery`] is that seam;
//! [`HtmlPageQuery`] answers it with CSS selectors from [`PageSelectors`].

use crate::config::PageSelectors;
use crate::error::{ParseError, Result};
use crate::types::PageMetadata;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Authors value used when a detail page has no author block
pub const UNKNOWN_AUTHORS: &str = "N/A";

/// Extracts links and fields from fetched pages
pub trait PageQuery: Send + Sync {
    /// Period links on the index page, in document order (may be relative)
    fn list_period_links(&self, html: &str) -> Result<Vec<String>>;

    /// Item links on a period listing page, in document order (may be relative)
    fn list_item_links(&self, html: &str) -> Result<Vec<String>>;

    /// Title, authors and asset link of a detail page
    fn extract_metadata(&self, html: &str) -> Result<PageMetadata>;

    /// Period identifier encoded in a period link, if recognizable
    fn period_id(&self, period_url: &str) -> Option<String> {
        last_path_segment(period_url)
    }
}

/// [`PageQuery`] driven by CSS selectors
pub struct HtmlPageQuery {
    period_links: Selector,
    item_links: Selector,
    heading: Selector,
    anchor: Selector,
    authors_label: String,
    asset_label: String,
    period_pattern: Regex,
}

impl HtmlPageQuery {
    /// Compile the configured selectors
    pub fn new(selectors: &PageSelectors) -> Result<Self> {
        Ok(Self {
            period_links: parse_selector(&selectors.period_links)?,
            item_links: parse_selector(&selectors.item_links)?,
            heading: parse_selector(&selectors.heading)?,
            anchor: parse_selector("a[href]")?,
            authors_label: selectors.authors_label.clone(),
            asset_label: selectors.asset_label.clone(),
            period_pattern: Regex::new(r"^\d{4}$").map_err(|e| ParseError::InvalidSelector {
                selector: "period pattern".to_string(),
                reason: e.to_string(),
            })?,
        })
    }

    fn hrefs(&self, html: &str, selector: &Selector) -> Vec<String> {
        let doc = Html::parse_document(html);
        doc.select(selector)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl PageQuery for HtmlPageQuery {
    fn list_period_links(&self, html: &str) -> Result<Vec<String>> {
        Ok(self.hrefs(html, &self.period_links))
    }

    fn list_item_links(&self, html: &str) -> Result<Vec<String>> {
        Ok(self.hrefs(html, &self.item_links))
    }

    fn extract_metadata(&self, html: &str) -> Result<PageMetadata> {
        let doc = Html::parse_document(html);

        let title = doc
            .select(&self.heading)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .ok_or(ParseError::MissingElement { what: "title" })?;

        // The author list is the element right after the heading that labels it
        let authors = doc
            .select(&self.heading)
            .find(|h| element_text(*h).contains(&self.authors_label))
            .and_then(|h| h.next_siblings().find_map(ElementRef::wrap))
            .map(element_text)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHORS.to_string());

        let asset_url = doc
            .select(&self.anchor)
            .find(|a| element_text(*a).contains(&self.asset_label))
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(str::to_string);

        Ok(PageMetadata {
            title,
            authors,
            asset_url,
        })
    }

    fn period_id(&self, period_url: &str) -> Option<String> {
        let path = url::Url::parse(period_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| period_url.to_string());
        path.split('/')
            .find(|segment| self.period_pattern.is_match(segment))
            .map(str::to_string)
            .or_else(|| last_path_segment(period_url))
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| {
        ParseError::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Visible text of an element with whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve a possibly relative link against the page it was found on
pub fn resolve_link(base: &str, href: &str) -> Result<String> {
    let invalid = |reason: String| ParseError::InvalidUrl {
        url: href.to_string(),
        reason,
    };
    let base = url::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    let resolved = base.join(href).map_err(|e| invalid(e.to_string()))?;
    Ok(resolved.to_string())
}

/// Last non-empty path segment of a URL (or of a bare path)
pub fn last_path_segment(link: &str) -> Option<String> {
    let path = match url::Url::parse(link) {
        Ok(url) => url.path().to_string(),
        Err(_) => link.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.split('/')
        .rev()
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Local file name for an asset: the last path segment of its URL
pub fn file_name_from_url(asset_url: &str) -> Result<String> {
    last_path_segment(asset_url)
        .filter(|name| name != "." && name != "..")
        .ok_or_else(|| {
            ParseError::NoFileName {
                url: asset_url.to_string(),
            }
            .into()
        })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const INDEX: &str = r#"<html><body>
        <div class="container-fluid"><div class="col-sm"><ul>
          <li><a href="/paper_files/paper/2021">Advances 2021</a></li>
          <li><a href="/paper_files/paper/2020">Advances 2020</a></li>
        </ul></div></div>
        <footer><a href="/about">About</a></footer>
    </body></html>"#;

    const LISTING: &str = r#"<html><body><ul>
        <li><a href="/paper_files/paper/2021/hash/aaa-Abstract.html">First</a></li>
        <li><a href="/paper_files/paper/2021/hash/bbb-Abstract.html">Second</a></li>
        <li><a href="/admin/login">Login</a></li>
    </ul></body></html>"#;

    const DETAIL: &str = r#"<html><body><div class="container-fluid">
        <h4>Deep   Residual
            Learning</h4>
        <a href="/paper_files/paper/2021/file/aaa-Bibtex.bib">Bibtex</a>
        <a href="/paper_files/paper/2021/file/aaa-Paper.pdf">Paper</a>
        <h4>Authors</h4>
        <p><i>Kaiming He, Xiangyu Zhang</i></p>
        <h4>Abstract</h4>
        <p>We present a residual learning framework.</p>
    </div></body></html>"#;

    fn query() -> HtmlPageQuery {
        HtmlPageQuery::new(&PageSelectors::default()).unwrap()
    }

    #[test]
    fn test_period_links_follow_selector() {
        let links = query().list_period_links(INDEX).unwrap();
        assert_eq!(
            links,
            vec!["/paper_files/paper/2021", "/paper_files/paper/2020"]
        );
    }

    #[test]
    fn test_item_links_match_path_convention() {
        let links = query().list_item_links(LISTING).unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.contains("/paper/")));
    }

    #[test]
    fn test_empty_listing_has_no_items() {
        let links = query()
            .list_item_links("<html><body><p>Nothing yet</p></body></html>")
            .unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn test_extract_metadata() {
        let meta = query().extract_metadata(DETAIL).unwrap();
        assert_eq!(meta.title, "Deep Residual Learning");
        assert_eq!(meta.authors, "Kaiming He, Xiangyu Zhang");
        assert_eq!(
            meta.asset_url.as_deref(),
            Some("/paper_files/paper/2021/file/aaa-Paper.pdf")
        );
    }

    #[test]
    fn test_extract_metadata_without_asset_or_authors() {
        let html = "<html><body><h4>Only a title</h4><p>text</p></body></html>";
        let meta = query().extract_metadata(html).unwrap();
        assert_eq!(meta.title, "Only a title");
        assert_eq!(meta.authors, UNKNOWN_AUTHORS);
        assert_eq!(meta.asset_url, None);
    }

    #[test]
    fn test_missing_title_is_parse_error() {
        let err = query()
            .extract_metadata("<html><body><p>no heading</p></body></html>")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::MissingElement { what: "title" })
        ));
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let selectors = PageSelectors {
            item_links: "a[href*=".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HtmlPageQuery::new(&selectors),
            Err(Error::Parse(ParseError::InvalidSelector { .. }))
        ));
    }

    #[test]
    fn test_period_id_prefers_four_digit_segment() {
        let q = query();
        assert_eq!(
            q.period_id("https://papers.nips.cc/paper_files/paper/2019").as_deref(),
            Some("2019")
        );
        assert_eq!(
            q.period_id("https://papers.nips.cc/book/2018/volume-1").as_deref(),
            Some("2018")
        );
        assert_eq!(
            q.period_id("https://archive.example/issues/spring-edition/").as_deref(),
            Some("spring-edition")
        );
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("https://papers.nips.cc/", "/paper_files/paper/2020").unwrap(),
            "https://papers.nips.cc/paper_files/paper/2020"
        );
        assert_eq!(
            resolve_link(
                "https://papers.nips.cc/paper_files/paper/2020",
                "https://cdn.example/file.pdf"
            )
            .unwrap(),
            "https://cdn.example/file.pdf"
        );
        assert!(resolve_link("not a base", "/x").is_err());
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://x.org/paper/2021/file/aaa-Paper.pdf?dl=1").unwrap(),
            "aaa-Paper.pdf"
        );
        assert!(file_name_from_url("https://x.org/").is_err());
    }
}
