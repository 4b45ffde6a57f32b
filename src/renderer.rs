//! Rendering of content pages into per-page PDF artifacts.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::Page;
use colored::*;
use scraper::{ElementRef, Html, Selector};
use slug::slugify;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{self, eval, js_string};
use crate::config::{Config, PdfOptions, Selectors};

/// CSS pixels per inch, as used by Chrome's print pipeline.
const PX_PER_INCH: f64 = 96.0;

/// Paper size of a single-page artifact and the width its content is laid out at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// CSS width the page occupies once printed with the configured margins and scale.
    pub layout_width_px: f64,
    pub paper_width_in: f64,
    pub paper_height_in: f64,
}

impl PageGeometry {
    /// Geometry for content `content_height_px` tall when laid out at `layout_width_px`.
    pub fn new(pdf: &PdfOptions, content_height_px: f64) -> Self {
        let scale = if pdf.scale > 0.0 { pdf.scale } else { 1.0 };
        let printable_px = pdf.width_px - (pdf.margin_left + pdf.margin_right) * PX_PER_INCH;
        let printed_height_px = content_height_px * scale + pdf.height_padding_px;

        Self {
            layout_width_px: (printable_px / scale).max(1.0),
            paper_width_in: pdf.width_px / PX_PER_INCH,
            paper_height_in: printed_height_px / PX_PER_INCH + pdf.margin_top + pdf.margin_bottom,
        }
    }
}

/// A heading found in a page's content region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeading {
    /// 1 through 6.
    pub level: u8,
    pub text: String,
    /// Element id, empty when the heading has none.
    pub anchor_id: String,
}

/// A successfully rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedPage {
    pub artifact_path: PathBuf,
    pub headings: Vec<PageHeading>,
    pub source_url: String,
    /// Position among successful exports; rewritten to the absolute page
    /// offset once merged.
    pub page_index: usize,
}

#[derive(Debug)]
pub enum RenderOutcome {
    Exported(ExportedPage),
    /// The page is deliberately left out (not an error).
    Skipped(String),
}

#[allow(async_fn_in_trait)]
pub trait PageRenderer {
    /// Render `url` as the `page_index`-th export.
    async fn render(&mut self, url: &str, page_index: usize) -> Result<RenderOutcome>;
}

/// Render every URL in order. Failed and skipped URLs are logged and left
/// out; indices count successful exports only.
pub async fn render_all<R: PageRenderer>(renderer: &mut R, urls: &[String]) -> Vec<ExportedPage> {
    let mut exported = Vec::with_capacity(urls.len());

    for (position, url) in urls.iter().enumerate() {
        let page_index = exported.len();
        match renderer.render(url, page_index).await {
            Ok(RenderOutcome::Exported(page)) => exported.push(page),
            Ok(RenderOutcome::Skipped(reason)) => {
                info!("Skipping \"{}\": {}", url.yellow(), reason);
            }
            Err(e) => {
                warn!("Failed to render \"{}\" ({}/{}): {:#}", url, position + 1, urls.len(), e);
            }
        }
    }

    info!("Rendered {} of {} pages", exported.len(), urls.len());
    exported
}

/// Renders pages through a single browser tab into `out_dir`.
pub struct BrowserRenderer<'a> {
    page: &'a Page,
    config: &'a Config,
    out_dir: PathBuf,
}

impl<'a> BrowserRenderer<'a> {
    pub fn new(page: &'a Page, config: &'a Config, out_dir: &Path) -> Self {
        Self {
            page,
            config,
            out_dir: out_dir.to_path_buf(),
        }
    }

    async fn inject_stylesheet(&self) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const style = document.createElement('style');
                style.textContent = {css};
                document.head.appendChild(style);
                return true;
            }})()"#,
            css = js_string(&self.config.stylesheet),
        );
        eval::<bool>(self.page, &script).await.map(|_| ())
    }

    /// Unlink anchors pointing back into the site, keeping their text.
    async fn strip_internal_links(&self) -> Result<usize> {
        let script = r#"(() => {
            let count = 0;
            for (const a of document.querySelectorAll('a[href]')) {
                const raw = a.getAttribute('href');
                const absolute = /^[a-z][a-z0-9+.-]*:/i.test(raw);
                if (absolute && a.host !== location.host) continue;
                a.removeAttribute('href');
                a.removeAttribute('target');
                a.removeAttribute('onclick');
                a.setAttribute('tabindex', '-1');
                a.style.pointerEvents = 'none';
                a.style.color = 'inherit';
                a.style.textDecoration = 'none';
                count++;
            }
            return count;
        })()"#;
        eval(self.page, script).await
    }

    /// Lay the page out at the width it will be printed at, so the measured
    /// height matches the printed one.
    async fn fit_layout_to_paper(&self) -> Result<()> {
        let width = PageGeometry::new(&self.config.pdf, 0.0).layout_width_px.floor() as i64;
        let height = i64::from(self.config.viewport.height);
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(width, height, 1.0, false))
            .await?;
        Ok(())
    }

    async fn measure_height(&self) -> Result<f64> {
        let script = format!(
            r#"(() => {{
                const content = document.querySelector({content});
                return content ? content.getBoundingClientRect().height : null;
            }})()"#,
            content = js_string(&self.config.selectors.content),
        );
        let height: Option<f64> = eval(self.page, &script).await?;
        match height {
            Some(h) if h > 0.0 => Ok(h),
            _ => Err(anyhow!("content region has no height")),
        }
    }

    fn print_params(&self, geometry: &PageGeometry) -> PrintToPdfParams {
        let pdf = &self.config.pdf;
        PrintToPdfParams {
            print_background: Some(pdf.print_background),
            scale: Some(pdf.scale),
            paper_width: Some(geometry.paper_width_in),
            paper_height: Some(geometry.paper_height_in),
            margin_top: Some(pdf.margin_top),
            margin_right: Some(pdf.margin_right),
            margin_bottom: Some(pdf.margin_bottom),
            margin_left: Some(pdf.margin_left),
            prefer_css_page_size: Some(false),
            ..Default::default()
        }
    }
}

impl PageRenderer for BrowserRenderer<'_> {
    async fn render(&mut self, url: &str, page_index: usize) -> Result<RenderOutcome> {
        let path = self.out_dir.join(artifact_name(url, page_index));
        info!("Rendering \"{}\" into \"{}\"", url.green(), path.display().to_string().blue());

        browser::load(self.page, url, self.config).await?;

        if let Err(e) = self.inject_stylesheet().await {
            warn!("Failed to inject stylesheet into {}: {:#}", url, e);
        }

        if self.config.rewrite_internal_links {
            match self.strip_internal_links().await {
                Ok(count) => debug!("Unlinked {} internal links", count),
                Err(e) => warn!("Failed to rewrite links on {}: {:#}", url, e),
            }
        }

        let headings = match self.page.content().await {
            Ok(html) => {
                if is_listing_page(&html, &self.config.selectors) {
                    return Ok(RenderOutcome::Skipped("listing page".to_string()));
                }
                extract_headings(&html, &self.config.selectors.content)
            }
            Err(e) => {
                warn!("Failed to read content of {}: {}", url, e);
                Vec::new()
            }
        };
        debug!("Found {} headings on {}", headings.len(), url);

        if let Err(e) = self.fit_layout_to_paper().await {
            warn!("Failed to resize {} to the paper width: {:#}", url, e);
        }
        let height = self.measure_height().await.unwrap_or_else(|e| {
            warn!("Failed to measure {}: {:#}, using fallback height", url, e);
            self.config.pdf.fallback_height_px
        });
        let geometry = PageGeometry::new(&self.config.pdf, height);
        debug!("{} measures {:.0}px at {:.0}px wide", url, height, geometry.layout_width_px);

        let pdf_data = self
            .page
            .pdf(self.print_params(&geometry))
            .await
            .with_context(|| format!("Failed to generate PDF for {}", url))?;

        fs::write(&path, pdf_data)
            .await
            .with_context(|| format!("Failed to write PDF to {}", path.display()))?;

        Ok(RenderOutcome::Exported(ExportedPage {
            artifact_path: path,
            headings,
            source_url: url.to_string(),
            page_index,
        }))
    }
}

/// `<index>_<slug>.pdf`, slug taken from the URL path.
pub fn artifact_name(url: &str, page_index: usize) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let slug = slugify(path.replace('/', "-"));
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "index" } else { slug };
    format!("{:03}_{}.pdf", page_index, slug)
}

/// A listing page holds one document card per content block.
pub fn is_listing_page(html: &str, selectors: &Selectors) -> bool {
    let (Ok(cards), Ok(blocks)) = (
        Selector::parse(&selectors.doc_card),
        Selector::parse(&selectors.content_block),
    ) else {
        warn!("Invalid listing selectors, treating page as content");
        return false;
    };

    let document = Html::parse_document(html);
    let card_count = document.select(&cards).count();
    let block_count = document.select(&blocks).count();
    debug!("{} cards, {} content blocks", card_count, block_count);

    block_count > 0 && card_count == block_count
}

/// Headings h1..h6 inside the first content region, in document order.
pub fn extract_headings(html: &str, content_selector: &str) -> Vec<PageHeading> {
    let (Ok(content), Ok(headings)) = (
        Selector::parse(content_selector),
        Selector::parse("h1, h2, h3, h4, h5, h6"),
    ) else {
        warn!("Invalid content selector \"{}\"", content_selector);
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let Some(region) = document.select(&content).next() else {
        return Vec::new();
    };

    region
        .select(&headings)
        .filter_map(|heading| {
            let text = heading_text(&heading);
            if text.is_empty() {
                return None;
            }
            let level = heading.value().name()[1..].parse().ok()?;
            Some(PageHeading {
                level,
                text,
                anchor_id: anchor_id(&heading),
            })
        })
        .collect()
}

fn heading_text(heading: &ElementRef) -> String {
    heading
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn anchor_id(heading: &ElementRef) -> String {
    if let Some(id) = heading.value().id() {
        return id.to_string();
    }
    let Ok(with_id) = Selector::parse("[id]") else {
        return String::new();
    };
    heading
        .select(&with_id)
        .find_map(|e| e.value().id().map(str::to_string))
        .unwrap_or_default()
}
