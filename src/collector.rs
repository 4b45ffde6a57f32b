//! Discovery of the ordered list of content pages.

use chromiumoxide::Page;
use colored::*;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{self, wait_for_selector};
use crate::config::Config;
use crate::dom_navigation::DomNavigation;
use crate::error::{ExportError, Result};
use crate::navigation::NavigationExpander;

pub struct LinkCollector<'a> {
    page: &'a Page,
    config: &'a Config,
}

impl<'a> LinkCollector<'a> {
    pub fn new(page: &'a Page, config: &'a Config) -> Self {
        Self { page, config }
    }

    /// Content-page URLs in navigation order.
    ///
    /// Fails only when the base page cannot be loaded; extraction problems
    /// after that yield an empty list.
    pub async fn collect(&self, base: &Url) -> Result<Vec<String>> {
        info!("Collecting links from \"{}\"", base.as_str().green());

        browser::load(self.page, base.as_str(), self.config)
            .await
            .map_err(|source| ExportError::Collection {
                url: base.to_string(),
                source,
            })?;

        let selectors = &self.config.selectors;
        let has_navigation = wait_for_selector(
            self.page,
            &selectors.section,
            self.config.timeouts.navigation_wait(),
        )
        .await;

        if !has_navigation {
            warn!("Navigation sections not found, extracting links from the whole page");
            return Ok(self.extract(&selectors.fallback_link, base).await);
        }

        let navigation = DomNavigation::new(self.page, selectors);
        NavigationExpander::new(self.config).expand(&navigation).await;
        tokio::time::sleep(self.config.timeouts.expand_settle()).await;

        Ok(self.extract(&selectors.content_link, base).await)
    }

    async fn extract(&self, selector: &str, base: &Url) -> Vec<String> {
        match self.page.content().await {
            Ok(html) => {
                let links = extract_links(&html, selector, base);
                info!("Collected {} links", links.len());
                links
            }
            Err(e) => {
                warn!("Failed to read page content: {}", e);
                Vec::new()
            }
        }
    }
}

/// Resolve, filter and de-duplicate the anchors matching `selector`.
///
/// Keeps http(s) URLs on the base host, drops fragments, and preserves the
/// first occurrence of each URL.
pub fn extract_links(html: &str, selector: &str, base: &Url) -> Vec<String> {
    let selector = match Selector::parse(selector) {
        Ok(selector) => selector,
        Err(e) => {
            warn!("Invalid link selector \"{}\": {:?}", selector, e);
            return Vec::new();
        }
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let mut url = match base.join(href) {
            Ok(url) => url,
            Err(e) => {
                debug!("Ignoring unparsable href \"{}\": {}", href, e);
                continue;
            }
        };
        if !matches!(url.scheme(), "http" | "https") || url.host_str() != base.host_str() {
            continue;
        }
        url.set_fragment(None);
        if seen.insert(url.to_string()) {
            links.push(url.to_string());
        }
    }

    debug!("Links collected: {:?}", links);
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Selectors;

    const SIDEBAR: &str = r##"
        <html><body>
        <nav class="menu">
          <ul class="theme-doc-sidebar-menu">
            <li><a class="menu__link" href="/docs/intro">Intro</a></li>
            <li class="theme-doc-sidebar-item-category">
              <div class="menu__list-item-collapsible">
                <a class="menu__link menu__link--sublist menu__link--sublist-caret" href="#">Guides</a>
              </div>
              <ul class="menu__list">
                <li><a class="menu__link" href="/docs/guides/setup#install">Setup</a></li>
                <li><a class="menu__link" href="guides/usage">Usage</a></li>
                <li><a class="menu__link menu__link--external" href="https://github.com/x">GitHub</a></li>
                <li><a class="menu__link" href="/docs/intro">Intro again</a></li>
              </ul>
            </li>
          </ul>
        </nav>
        <main><article><a class="menu__link" href="/docs/elsewhere">Outside nav</a></article></main>
        </body></html>
    "##;

    fn base() -> Url {
        Url::parse("https://docs.example.com/docs/").unwrap()
    }

    #[test]
    fn test_extracts_navigation_links_in_order() {
        let links = extract_links(SIDEBAR, &Selectors::default().content_link, &base());
        assert_eq!(
            links,
            vec![
                "https://docs.example.com/docs/intro",
                "https://docs.example.com/docs/guides/setup",
                "https://docs.example.com/docs/guides/usage",
            ]
        );
    }

    #[test]
    fn test_fallback_selector_covers_whole_document() {
        let links = extract_links(SIDEBAR, &Selectors::default().fallback_link, &base());
        assert_eq!(links.len(), 4);
        assert_eq!(links.last().unwrap(), "https://docs.example.com/docs/elsewhere");
    }

    #[test]
    fn test_other_hosts_and_schemes_are_dropped() {
        let html = r#"<a href="mailto:a@b.c">m</a><a href="https://other.org/x">o</a>
                      <a href="javascript:void(0)">j</a><a href="/ok">ok</a>"#;
        let links = extract_links(html, "a", &base());
        assert_eq!(links, vec!["https://docs.example.com/ok"]);
    }

    #[test]
    fn test_invalid_selector_yields_nothing() {
        assert!(extract_links(SIDEBAR, "a[[", &base()).is_empty());
    }
}
