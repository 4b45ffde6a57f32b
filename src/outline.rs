//! Bookmark outline reconstructed from per-page heading levels.
//!
//! Nodes live in an arena and link to each other by index. A heading at
//! level `L` hangs under the most recent still-open node at `L - 1`; when no
//! such node exists it becomes a root.

use anyhow::{anyhow, Result};
use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};
use tracing::debug;

use crate::renderer::ExportedPage;

pub const MAX_LEVEL: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkNode {
    pub title: String,
    pub target_page_index: usize,
    pub level: u8,
    pub parent: Option<usize>,
    pub previous_sibling: Option<usize>,
    pub next_sibling: Option<usize>,
    pub first_child: Option<usize>,
    pub last_child: Option<usize>,
    pub child_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlineTree {
    nodes: Vec<BookmarkNode>,
    roots: Vec<usize>,
}

impl OutlineTree {
    /// Build from `(level, title, absolute page index)` triples in final document order.
    pub fn build<'t>(entries: impl IntoIterator<Item = (u8, &'t str, usize)>) -> Self {
        let mut tree = OutlineTree::default();
        // open[level] is the most recent node at that level whose branch is still open.
        let mut open: [Option<usize>; MAX_LEVEL + 1] = [None; MAX_LEVEL + 1];

        for (level, title, page) in entries {
            let title = title.trim();
            if title.is_empty() {
                continue;
            }
            let level = usize::from(level).clamp(1, MAX_LEVEL);
            let parent = if level > 1 { open[level - 1] } else { None };
            let previous = match parent {
                Some(p) => tree.nodes[p].last_child,
                None => tree.roots.last().copied(),
            };

            let index = tree.nodes.len();
            tree.nodes.push(BookmarkNode {
                title: title.to_string(),
                target_page_index: page,
                level: level as u8,
                parent,
                previous_sibling: previous,
                next_sibling: None,
                first_child: None,
                last_child: None,
                child_count: 0,
            });

            if let Some(previous) = previous {
                tree.nodes[previous].next_sibling = Some(index);
            }
            match parent {
                Some(p) => {
                    let parent = &mut tree.nodes[p];
                    parent.first_child.get_or_insert(index);
                    parent.last_child = Some(index);
                    parent.child_count += 1;
                }
                None => tree.roots.push(index),
            }

            open[level] = Some(index);
            for deeper in open.iter_mut().skip(level + 1) {
                *deeper = None;
            }
        }

        debug!("Outline has {} entries, {} roots", tree.nodes.len(), tree.roots.len());
        tree
    }

    /// Headings of every page, targeting each page's merged offset.
    pub fn from_pages(pages: &[ExportedPage]) -> Self {
        Self::build(pages.iter().flat_map(|page| {
            page.headings
                .iter()
                .map(move |h| (h.level, h.text.as_str(), page.page_index))
        }))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[BookmarkNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &BookmarkNode {
        &self.nodes[index]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Children of `index`, following the first-child / next-sibling chain.
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[index].first_child, move |&c| self.nodes[c].next_sibling)
    }

    /// Number of descendants of every node, the `/Count` of an open outline item.
    pub fn descendant_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes.len()];
        // Children always come after their parent, so one reverse pass suffices.
        for index in (0..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[index].parent {
                counts[parent] += 1 + counts[index];
            }
        }
        counts
    }

    /// Write the tree into `doc` as its `/Outlines` dictionary.
    ///
    /// `page_ids[i]` is the object of absolute page `i`. Nothing is written
    /// unless every entry resolves.
    pub fn write_into(&self, doc: &mut Document, catalog_id: ObjectId, page_ids: &[ObjectId]) -> Result<()> {
        let (Some(&first), Some(&last)) = (self.roots.first(), self.roots.last()) else {
            return Ok(());
        };

        let outlines_id = doc.new_object_id();
        let ids: Vec<ObjectId> = self.nodes.iter().map(|_| doc.new_object_id()).collect();

        let descendants = self.descendant_counts();
        let mut items = Vec::with_capacity(self.nodes.len());
        for (index, (node, &id)) in self.nodes.iter().zip(&ids).enumerate() {
            let page = page_ids.get(node.target_page_index).ok_or_else(|| {
                anyhow!(
                    "bookmark \"{}\" targets page {} of {}",
                    node.title,
                    node.target_page_index,
                    page_ids.len()
                )
            })?;

            let mut item = dictionary! {
                "Title" => text_string(&node.title),
                "Parent" => node.parent.map_or(outlines_id, |p| ids[p]),
                "Dest" => vec![Object::Reference(*page), "Fit".into()],
            };
            if let Some(prev) = node.previous_sibling {
                item.set("Prev", ids[prev]);
            }
            if let Some(next) = node.next_sibling {
                item.set("Next", ids[next]);
            }
            if let (Some(first), Some(last)) = (node.first_child, node.last_child) {
                item.set("First", ids[first]);
                item.set("Last", ids[last]);
                item.set("Count", descendants[index] as i64);
            }
            items.push((id, item));
        }

        for (id, item) in items {
            doc.objects.insert(id, Object::Dictionary(item));
        }
        doc.objects.insert(
            outlines_id,
            Object::Dictionary(dictionary! {
                "Type" => "Outlines",
                "First" => ids[first],
                "Last" => ids[last],
                "Count" => self.roots.len() as i64,
            }),
        );

        let catalog = doc.get_object_mut(catalog_id)?.as_dict_mut()?;
        catalog.set("Outlines", outlines_id);
        catalog.set("PageMode", "UseOutlines");
        Ok(())
    }
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}
