//! Listing page parsing: locating product items and the next-page link

pub mod extract;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::SiteSettings;
use crate::error::ConfigError;

pub use extract::{Extraction, ItemExtractor, SkipReason};

/// Compile a CSS selector, reporting the offending string on failure.
pub fn compile_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::Selector {
        selector: selector.to_string(),
        message: format!("{e:?}"),
    })
}

fn compile_all(selectors: &[String]) -> Result<Vec<Selector>, ConfigError> {
    selectors.iter().map(|s| compile_selector(s)).collect()
}

/// Parse the configured origin, requiring an absolute http(s) URL.
pub fn parse_origin(origin: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(origin).map_err(|e| ConfigError::Origin(origin.to_string(), e))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid(format!(
            "site origin `{origin}` cannot be used as a base URL"
        )));
    }
    Ok(url)
}

/// Make `href` absolute against `origin`. Absolute http(s) URLs are returned unchanged;
/// anything resolving to another scheme (`javascript:`, `mailto:`) is not a page.
pub fn resolve_url(origin: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    if let Ok(absolute) = Url::parse(href)
        && matches!(absolute.scheme(), "http" | "https")
    {
        return Some(href.to_string());
    }

    match origin.join(href) {
        Ok(joined) if matches!(joined.scheme(), "http" | "https") => Some(joined.to_string()),
        Ok(joined) => {
            debug!("Ignoring non-http link {}", joined);
            None
        }
        Err(e) => {
            debug!("Could not resolve {} against {}: {}", href, origin, e);
            None
        }
    }
}

/// What a listing page yielded.
#[derive(Debug)]
pub struct ParsedPage<'a> {
    pub items: Vec<ElementRef<'a>>,
    pub next_url: Option<String>,
}

/// Locates item elements and the next-page link using prioritized selector lists.
#[derive(Debug, Clone)]
pub struct PageParser {
    origin: Url,
    containers: Vec<Selector>,
    item: Selector,
    fallback_items: Vec<Selector>,
    next_page: Vec<Selector>,
}

impl PageParser {
    pub fn new(site: &SiteSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            origin: parse_origin(&site.origin)?,
            containers: compile_all(&site.container_selectors)?,
            item: compile_selector(&site.item_selector)?,
            fallback_items: compile_all(&site.fallback_item_selectors)?,
            next_page: compile_all(&site.next_page_selectors)?,
        })
    }

    /// Items in document order plus the absolute next-page URL.
    ///
    /// A page without any items reports no next page either, so the walk ends there.
    pub fn parse<'a>(&self, document: &'a Html) -> ParsedPage<'a> {
        let items = self.find_items(document);
        if items.is_empty() {
            warn!("No product items matched any selector");
            return ParsedPage {
                items,
                next_url: None,
            };
        }

        ParsedPage {
            items,
            next_url: self.find_next_page(document),
        }
    }

    fn find_items<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        for (index, container_selector) in self.containers.iter().enumerate() {
            for container in document.select(container_selector) {
                let items: Vec<_> = container.select(&self.item).collect();
                if !items.is_empty() {
                    debug!("Found {} items with container selector #{}", items.len(), index);
                    return items;
                }
            }
        }

        for (index, selector) in self.fallback_items.iter().enumerate() {
            let items: Vec<_> = document.select(selector).collect();
            if !items.is_empty() {
                debug!("Found {} items with fallback selector #{}", items.len(), index);
                return items;
            }
        }

        Vec::new()
    }

    /// First configured link selector whose element carries an `href`.
    pub fn find_next_page(&self, document: &Html) -> Option<String> {
        self.next_page.iter().find_map(|selector| {
            document
                .select(selector)
                .find_map(|link| link.value().attr("href"))
                .and_then(|href| resolve_url(&self.origin, href))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> PageParser {
        PageParser::new(&SiteSettings::default()).unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let origin = Url::parse("https://www.currys.co.uk").unwrap();
        assert_eq!(
            resolve_url(&origin, "/computing/laptops?page=2").as_deref(),
            Some("https://www.currys.co.uk/computing/laptops?page=2")
        );
        assert_eq!(
            resolve_url(&origin, "https://cdn.example.com/x").as_deref(),
            Some("https://cdn.example.com/x")
        );
        assert_eq!(
            resolve_url(&origin, "//www.currys.co.uk/a").as_deref(),
            Some("https://www.currys.co.uk/a")
        );
        assert_eq!(resolve_url(&origin, "  "), None);
        assert_eq!(resolve_url(&origin, "javascript:void(0)"), None);
        assert_eq!(resolve_url(&origin, "mailto:help@currys.co.uk"), None);
    }

    #[test]
    fn test_container_match_wins() {
        let html = Html::parse_document(
            r#"<div class="row product-grid list-view">
                 <div class="product">A</div><div class="product">B</div>
               </div>
               <div class="product">outside</div>
               <a class="next" href="/page-2">Next</a>"#,
        );
        let page = parser().parse(&html);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_url.as_deref(), Some("https://www.currys.co.uk/page-2"));
    }

    #[test]
    fn test_fallback_selectors_in_order() {
        let html = Html::parse_document(
            r#"<section><div class="product-card" data-productdatalayer="[]">A</div></section>"#,
        );
        let page = parser().parse(&html);
        assert_eq!(page.items.len(), 1);
        assert!(page.next_url.is_none());
    }

    #[test]
    fn test_no_items_means_no_next_page() {
        let html = Html::parse_document(
            r#"<div class="banner">Nothing here</div><a class="next" href="/page-2">Next</a>"#,
        );
        let page = parser().parse(&html);
        assert!(page.items.is_empty());
        assert!(page.next_url.is_none());
    }

    #[test]
    fn test_next_page_selector_priority() {
        let html = Html::parse_document(
            r#"<a rel="next" href="/rel-next">rel</a>
               <a class="btn next-page-link" href="/partial">partial</a>"#,
        );
        assert_eq!(
            parser().find_next_page(&html).as_deref(),
            Some("https://www.currys.co.uk/partial")
        );
    }

    #[test]
    fn test_script_next_link_ends_the_walk() {
        let html = Html::parse_document(
            r#"<div class="product">A</div>
               <a class="next" href="javascript:void(0)">Next</a>"#,
        );
        let page = parser().parse(&html);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_url, None);
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let site = SiteSettings {
            item_selector: "div[".to_string(),
            ..SiteSettings::default()
        };
        assert!(matches!(
            PageParser::new(&site),
            Err(ConfigError::Selector { .. })
        ));
    }
}
