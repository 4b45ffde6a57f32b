use anyhow::anyhow;
use chromiumoxide::Page;
use colored::*;
use std::path::{Path, PathBuf};
use tokio::time::timeout;
use tracing::{info, info_span, warn, Instrument};
use url::Url;

use crate::browser::Surface;
use crate::collector::LinkCollector;
use crate::config::{Config, ConfigOverrides};
use crate::error::{ExportError, Result};
use crate::pdf_merger::{assemble, AssemblyReport};
use crate::renderer::{render_all, BrowserRenderer};
use crate::workspace::{ensure_dir, Workspace};

/// Runs the whole pipeline for one site: collect, render, assemble.
pub struct Exporter {
    config: Config,
}

impl Exporter {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Export `target_url` into a single PDF at `output`.
    pub async fn run(&self, target_url: &str, output: &Path) -> Result<AssemblyReport> {
        let base = Url::parse(target_url)?;
        info!("Visiting \"{}\"", target_url.green());

        let surface = Surface::launch(&self.config).await.map_err(ExportError::Browser)?;
        let result = self.run_internal(&surface, &base, output).await;
        surface.close().await;

        result
    }

    /// Only discover the page list, without rendering anything.
    pub async fn collect(&self, target_url: &str) -> Result<Vec<String>> {
        let base = Url::parse(target_url)?;

        let surface = Surface::launch(&self.config).await.map_err(ExportError::Browser)?;
        let result = async {
            let page = surface.new_page().await.map_err(ExportError::Browser)?;
            self.check_reachable(&page, &base).await?;
            LinkCollector::new(&page, &self.config).collect(&base).await
        }
        .await;
        surface.close().await;

        result
    }

    async fn run_internal(&self, surface: &Surface, base: &Url, output: &Path) -> Result<AssemblyReport> {
        let page = surface.new_page().await.map_err(ExportError::Browser)?;
        self.check_reachable(&page, base).await?;

        let workspace = Workspace::create().map_err(ExportError::Workspace)?;

        let result = self.export_pages(&page, base, workspace.path(), output).await;

        if self.config.cleanup {
            workspace.remove().await;
        } else {
            info!("Keeping page PDFs in {}", workspace.keep().display().to_string().blue());
        }

        result
    }

    async fn export_pages(&self, page: &Page, base: &Url, work_dir: &Path, output: &Path) -> Result<AssemblyReport> {
        let links = LinkCollector::new(page, &self.config)
            .collect(base)
            .instrument(info_span!("collect"))
            .await?;
        if links.is_empty() {
            warn!("No content links found on {}", base);
        }

        let mut renderer = BrowserRenderer::new(page, &self.config, work_dir);
        let mut pages = render_all(&mut renderer, &links)
            .instrument(info_span!("render"))
            .await;
        if pages.is_empty() {
            return Err(ExportError::NothingToMerge);
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).await.map_err(|source| ExportError::Write {
                path: output.to_path_buf(),
                source,
            })?;
        }

        let report = assemble(&mut pages, output)
            .instrument(info_span!("assemble"))
            .await?;
        info!(
            "Exported {} pages ({} bookmarks) to {}",
            report.page_count,
            report.bookmarks,
            output.display().to_string().green()
        );
        Ok(report)
    }

    /// Fail fast when the site does not answer within the page-load timeout.
    async fn check_reachable(&self, page: &Page, base: &Url) -> Result<()> {
        let limit = self.config.timeouts.page_load();
        let connectivity = |source| ExportError::Connectivity {
            url: base.to_string(),
            source,
        };

        match timeout(limit, page.goto(base.as_str())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(connectivity(anyhow!(e))),
            Err(_) => Err(connectivity(anyhow!("no response within {:?}", limit))),
        }
    }
}

/// Export with default settings. `cleanup` removes the per-page PDFs afterwards.
pub async fn export(target_url: &str, output: &Path, cleanup: bool) -> Result<PathBuf> {
    let config = Config {
        cleanup,
        ..Config::default()
    };
    Exporter::new(config).run(target_url, output).await?;
    Ok(output.to_path_buf())
}

/// Export with `overrides` applied over the defaults.
pub async fn export_with_overrides(
    target_url: &str,
    output: &Path,
    overrides: ConfigOverrides,
) -> Result<PathBuf> {
    let config = Config::default().with_overrides(overrides);
    Exporter::new(config).run(target_url, output).await?;
    Ok(output.to_path_buf())
}

/// `<host-slug>.pdf`, the default output name for `target_url`.
pub fn default_output_name(target_url: &str) -> String {
    let host = Url::parse(target_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "docs".to_string());
    format!("{}.pdf", slug::slugify(host.replace('.', "-")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::tests::{quick_config, FakeEntry, FakeTree};
    use crate::navigation::NavigationExpander;
    use crate::pdf_merger::tests::sample_pdf;
    use crate::renderer::{ExportedPage, PageHeading, PageRenderer, RenderOutcome};
    use lopdf::{Document, Object};

    /// Writes a one-page PDF per URL; the page title is the last path segment.
    struct StubRenderer {
        dir: PathBuf,
        listings: Vec<String>,
    }

    impl PageRenderer for StubRenderer {
        async fn render(&mut self, url: &str, page_index: usize) -> anyhow::Result<RenderOutcome> {
            if self.listings.iter().any(|l| l == url) {
                return Ok(RenderOutcome::Skipped("listing page".to_string()));
            }
            let title = url.rsplit('/').next().unwrap_or_default().to_uppercase();
            let path = self.dir.join(crate::renderer::artifact_name(url, page_index));
            std::fs::write(&path, sample_pdf(1))?;
            Ok(RenderOutcome::Exported(ExportedPage {
                artifact_path: path,
                headings: vec![PageHeading { level: 1, text: title, anchor_id: String::new() }],
                source_url: url.to_string(),
                page_index,
            }))
        }
    }

    fn root_titles(doc: &Document) -> Vec<String> {
        let catalog = doc.catalog().unwrap();
        let outlines = doc
            .get_dictionary(catalog.get(b"Outlines").and_then(Object::as_reference).unwrap())
            .unwrap();
        let mut titles = Vec::new();
        let mut next = outlines.get(b"First").and_then(Object::as_reference).ok();
        while let Some(id) = next {
            let item = doc.get_dictionary(id).unwrap();
            assert!(item.get(b"First").is_err(), "roots have no children");
            titles.push(String::from_utf8_lossy(item.get(b"Title").and_then(Object::as_str).unwrap()).into_owned());
            next = item.get(b"Next").and_then(Object::as_reference).ok();
        }
        titles
    }

    async fn pipeline(tree: &FakeTree, listings: Vec<String>) -> (Document, Vec<ExportedPage>) {
        let config = quick_config();
        NavigationExpander::new(&config).expand(tree).await;
        let links = tree.visible_links();

        let dir = tempfile::tempdir().unwrap();
        let mut renderer = StubRenderer { dir: dir.path().to_path_buf(), listings };
        let mut pages = render_all(&mut renderer, &links).await;
        let output = dir.path().join("book.pdf");
        assemble(&mut pages, &output).await.unwrap();

        (Document::load(&output).unwrap(), pages)
    }

    #[tokio::test]
    async fn test_two_sections_two_bookmarks() {
        let tree = FakeTree::new(vec![
            FakeEntry::section("first", vec![FakeEntry::page("a")]),
            FakeEntry::section("second", vec![FakeEntry::page("b")]),
        ]);

        let (doc, _) = pipeline(&tree, vec![]).await;

        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(root_titles(&doc), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_listing_page_is_left_out() {
        let tree = FakeTree::new(vec![FakeEntry::section("guides", vec![
            FakeEntry::page("overview"),
            FakeEntry::page("setup"),
            FakeEntry::page("usage"),
        ])]);

        let (doc, pages) = pipeline(&tree, vec!["https://docs.test/overview".to_string()]).await;

        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(root_titles(&doc), vec!["SETUP", "USAGE"]);
        let indices: Vec<usize> = pages.iter().map(|p| p.page_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_default_output_name() {
        assert_eq!(default_output_name("https://docs.example.com/guide/"), "docs-example-com.pdf");
        assert_eq!(default_output_name("not a url"), "docs.pdf");
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_launching() {
        let err = Exporter::new(Config::default())
            .run("::nope::", Path::new("out.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidUrl(_)));
    }
}
