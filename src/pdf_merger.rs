use anyhow::{anyhow, Context, Result};
use lopdf::{dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::outline::OutlineTree;
use crate::renderer::ExportedPage;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Concatenates PDF documents page by page.
pub struct PdfMerger {
    objects: BTreeMap<ObjectId, Object>,
    pages: Vec<ObjectId>,
    max_id: u32,
}

impl PdfMerger {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            pages: Vec::new(),
            max_id: 0,
        }
    }

    /// Pages appended so far; also the offset the next document starts at.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Append every page of the PDF at `path`. Returns the number of pages added.
    pub async fn add_pdf(&mut self, path: &Path) -> Result<usize> {
        let data = fs::read(path)
            .await
            .map_err(|e| anyhow!("Failed to read PDF file {}: {}", path.display(), e))?;

        let document = Document::load_mem(&data)
            .map_err(|e| anyhow!("Failed to parse PDF file {}: {}", path.display(), e))?;

        let added = self.add_document(document)?;
        debug!("Loaded PDF with {} pages from {}", added, path.display());
        Ok(added)
    }

    pub fn add_document(&mut self, mut document: Document) -> Result<usize> {
        // Renumber objects to avoid conflicts
        document.renumber_objects_with(self.max_id + 1);

        let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(anyhow!("document has no pages"));
        }

        for &page_id in &page_ids {
            let attributes = inherited_attributes(&document, page_id);
            let page = document
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|e| anyhow!("page object {:?} is unusable: {}", page_id, e))?;
            for (key, value) in attributes {
                page.set(key, value);
            }
        }

        let max_id = document.max_id;
        for (id, object) in document.objects {
            if is_structural(&object) {
                continue;
            }
            self.objects.insert(id, object);
        }
        self.max_id = self.max_id.max(max_id);
        self.pages.extend(&page_ids);
        Ok(page_ids.len())
    }

    /// Build the merged document, with `outline` when it can be written.
    pub fn build(self, outline: Option<&OutlineTree>) -> Document {
        let mut doc = Document::with_version("1.7");
        doc.objects = self.objects;
        doc.max_id = self.max_id;

        let pages_id = doc.new_object_id();
        for page_id in &self.pages {
            if let Some(Object::Dictionary(page)) = doc.objects.get_mut(page_id) {
                page.set("Parent", pages_id);
            }
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.pages.iter().copied().map(Object::Reference).collect::<Vec<_>>(),
                "Count" => self.pages.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if let Some(outline) = outline.filter(|o| !o.is_empty()) {
            if let Err(e) = outline.write_into(&mut doc, catalog_id, &self.pages) {
                warn!("Omitting bookmarks: {:#}", e);
            }
        }

        info!("Finalizing merged PDF with {} total pages", self.pages.len());
        doc
    }

    /// Serialize to `output_path` through a sibling temporary file, so a
    /// failed write leaves nothing behind.
    pub async fn save(self, output_path: &Path, outline: Option<&OutlineTree>) -> Result<()> {
        if self.pages.is_empty() {
            return Err(anyhow!("No PDFs added to merge"));
        }

        let mut document = self.build(outline);
        document.compress();

        let mut data = Vec::new();
        document
            .save_to(&mut data)
            .map_err(|e| anyhow!("Failed to serialize merged PDF: {}", e))?;

        let partial = partial_path(output_path);
        let written = async {
            fs::write(&partial, &data).await?;
            fs::rename(&partial, output_path).await
        }
        .await;

        if let Err(e) = written {
            fs::remove_file(&partial).await.ok();
            return Err(e).with_context(|| format!("Failed to write merged PDF to {}", output_path.display()));
        }
        Ok(())
    }
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// What the assembler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    pub output: PathBuf,
    pub page_count: usize,
    pub merged_artifacts: usize,
    pub skipped_artifacts: usize,
    pub bookmarks: usize,
}

/// Merge the artifacts of `pages` into `output` in order, rewriting each
/// page's index to its absolute offset and adding a bookmark outline.
///
/// Unreadable artifacts are skipped. Fails when there is nothing to merge
/// or the output cannot be written.
pub async fn assemble(pages: &mut [ExportedPage], output: &Path) -> Result<AssemblyReport, ExportError> {
    if pages.is_empty() {
        return Err(ExportError::NothingToMerge);
    }
    info!("Starting PDF merge process with {} documents", pages.len());

    let mut merger = PdfMerger::new();
    let mut merged = Vec::with_capacity(pages.len());

    for page in pages.iter_mut() {
        let offset = merger.page_count();
        match merger.add_pdf(&page.artifact_path).await {
            Ok(count) => {
                debug!("{} -> pages {}..{}", page.source_url, offset, offset + count);
                page.page_index = offset;
                merged.push(page.clone());
            }
            Err(e) => warn!("Skipping artifact for {}: {:#}", page.source_url, e),
        }
    }

    if merged.is_empty() {
        return Err(ExportError::NothingToMerge);
    }

    let outline = OutlineTree::from_pages(&merged);
    if outline.is_empty() {
        info!("No headings found, the PDF will have no bookmarks");
    }

    let report = AssemblyReport {
        output: output.to_path_buf(),
        page_count: merger.page_count(),
        merged_artifacts: merged.len(),
        skipped_artifacts: pages.len() - merged.len(),
        bookmarks: outline.len(),
    };

    merger
        .save(output, Some(&outline))
        .await
        .map_err(|source| ExportError::Write {
            path: output.to_path_buf(),
            source,
        })?;

    info!("Successfully merged {} PDFs into {}", report.merged_artifacts, output.display());
    Ok(report)
}

/// Catalogs, page tree nodes and outlines of an appended document are rebuilt, not copied.
fn is_structural(object: &Object) -> bool {
    let Ok(dict) = object.as_dict() else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog") | Ok(b"Pages") | Ok(b"Outlines")
    )
}

/// Inheritable attributes the page lacks but an ancestor defines.
fn inherited_attributes(document: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(page) = document.get_dictionary(page_id) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    let mut missing: Vec<&[u8]> = INHERITABLE.iter().copied().filter(|k| !page.has(k)).collect();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut hops = 0;

    while let Some(parent_id) = parent {
        if missing.is_empty() || hops > 32 {
            break;
        }
        let Ok(node) = document.get_dictionary(parent_id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        hops += 1;
    }
    found
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::renderer::PageHeading;
    use lopdf::content::{Content, Operation};
    use lopdf::Stream;

    /// A minimal document with `pages` pages; MediaBox sits on the page tree
    /// root so the merger must pin it onto each page.
    pub(crate) fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for i in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Page {}", i + 1))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut data = Vec::new();
        doc.save_to(&mut data).unwrap();
        data
    }

    fn exported(dir: &Path, name: &str, page_count: usize, headings: &[(u8, &str)], index: usize) -> ExportedPage {
        let path = dir.join(format!("{}.pdf", name));
        if page_count > 0 {
            std::fs::write(&path, sample_pdf(page_count)).unwrap();
        }
        ExportedPage {
            artifact_path: path,
            headings: headings
                .iter()
                .map(|(level, text)| PageHeading { level: *level, text: text.to_string(), anchor_id: String::new() })
                .collect(),
            source_url: format!("https://d.test/{}", name),
            page_index: index,
        }
    }

    fn outline_titles(doc: &Document) -> Vec<String> {
        let Ok(outlines) = doc
            .catalog()
            .and_then(|c| c.get(b"Outlines"))
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id))
        else {
            return Vec::new();
        };
        let mut titles = Vec::new();
        let mut next = outlines.get(b"First").and_then(Object::as_reference).ok();
        while let Some(id) = next {
            let item = doc.get_dictionary(id).unwrap();
            let title = item.get(b"Title").and_then(Object::as_str).unwrap();
            titles.push(String::from_utf8_lossy(title).into_owned());
            next = item.get(b"Next").and_then(Object::as_reference).ok();
        }
        titles
    }

    #[tokio::test]
    async fn test_offsets_follow_page_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut pages = vec![
            exported(dir.path(), "a", 2, &[], 0),
            exported(dir.path(), "b", 3, &[], 1),
            exported(dir.path(), "c", 1, &[], 2),
        ];
        let output = dir.path().join("out.pdf");

        let report = assemble(&mut pages, &output).await.unwrap();

        assert_eq!(report.page_count, 6);
        let offsets: Vec<usize> = pages.iter().map(|p| p.page_index).collect();
        assert_eq!(offsets, vec![0, 2, 5]);

        let merged = Document::load(&output).unwrap();
        assert_eq!(merged.get_pages().len(), 6);
        for page_id in merged.get_pages().values() {
            let page = merged.get_dictionary(*page_id).unwrap();
            assert!(page.has(b"MediaBox"));
            assert!(page.has(b"Resources"));
        }
        assert!(!dir.path().join("out.pdf.part").exists());
    }

    #[tokio::test]
    async fn test_two_pages_two_root_bookmarks() {
        let dir = tempfile::tempdir().unwrap();
        let mut pages = vec![
            exported(dir.path(), "a", 1, &[(1, "A")], 0),
            exported(dir.path(), "b", 1, &[(1, "B")], 1),
        ];
        let output = dir.path().join("book.pdf");

        let report = assemble(&mut pages, &output).await.unwrap();

        assert_eq!(report.page_count, 2);
        assert_eq!(report.bookmarks, 2);
        let merged = Document::load(&output).unwrap();
        assert_eq!(outline_titles(&merged), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_unreadable_artifact_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, b"not a pdf").unwrap();
        let mut pages = vec![
            exported(dir.path(), "a", 1, &[(1, "A")], 0),
            ExportedPage {
                artifact_path: broken,
                headings: vec![PageHeading { level: 1, text: "Broken".into(), anchor_id: String::new() }],
                source_url: "https://d.test/broken".into(),
                page_index: 1,
            },
            exported(dir.path(), "c", 2, &[(1, "C")], 2),
        ];
        let output = dir.path().join("out.pdf");

        let report = assemble(&mut pages, &output).await.unwrap();

        assert_eq!(report.page_count, 3);
        assert_eq!(report.skipped_artifacts, 1);
        assert_eq!(pages[2].page_index, 1);
        let merged = Document::load(&output).unwrap();
        assert_eq!(outline_titles(&merged), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_single_artifact_without_headings() {
        let dir = tempfile::tempdir().unwrap();
        let mut pages = vec![exported(dir.path(), "only", 3, &[], 0)];
        let output = dir.path().join("out.pdf");

        let report = assemble(&mut pages, &output).await.unwrap();

        assert_eq!(report.page_count, 3);
        assert_eq!(report.bookmarks, 0);
        let merged = Document::load(&output).unwrap();
        assert!(merged.catalog().unwrap().get(b"Outlines").is_err());
    }

    #[tokio::test]
    async fn test_nothing_to_merge() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");

        let err = assemble(&mut [], &output).await.unwrap_err();
        assert!(matches!(err, ExportError::NothingToMerge));

        let mut missing = vec![exported(dir.path(), "missing", 0, &[], 0)];
        let err = assemble(&mut missing, &output).await.unwrap_err();
        assert!(matches!(err, ExportError::NothingToMerge));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut pages = vec![exported(dir.path(), "a", 1, &[], 0)];
        let output = dir.path().join("no-such-dir").join("out.pdf");

        let err = assemble(&mut pages, &output).await.unwrap_err();
        assert!(matches!(err, ExportError::Write { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_rejected_document_leaves_merger_untouched() {
        let mut merger = PdfMerger::new();
        merger.add_document(Document::load_mem(&sample_pdf(1)).unwrap()).unwrap();
        let (objects, max_id) = (merger.objects.len(), merger.max_id);

        let mut empty = Document::with_version("1.5");
        let pages_id = empty.add_object(dictionary! { "Type" => "Pages", "Kids" => Vec::<Object>::new(), "Count" => 0 });
        let catalog_id = empty.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        empty.trailer.set("Root", catalog_id);
        empty.add_object(dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Courier" });

        assert!(merger.add_document(empty).is_err());
        assert_eq!(merger.objects.len(), objects);
        assert_eq!(merger.max_id, max_id);

        merger.add_document(Document::load_mem(&sample_pdf(2)).unwrap()).unwrap();
        let doc = merger.build(None);
        assert_eq!(doc.get_pages().len(), 3);
        for page_id in doc.get_pages().values() {
            assert!(doc.get_dictionary(*page_id).unwrap().has(b"MediaBox"));
        }
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(partial_path(Path::new("/tmp/book.pdf")), PathBuf::from("/tmp/book.pdf.part"));
    }
}
