//! Merge: concatenate the pages of N PDFs in input order.
//!
//! Each source keeps its own page tree. The trees are renumbered into one
//! object space and hung under a new root `Pages` node, so inherited page
//! attributes (MediaBox, Resources, Rotate set on intermediate nodes) keep
//! working without touching individual pages.

use super::{checkpoint, load_structural, save_structural};
use crate::error::ToolError;
use crate::intake::StoredInput;
use lopdf::{dictionary, Document, Object};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const OUTPUT_NAME: &str = "merged.pdf";

/// Merge `inputs` into `<work_dir>/merged.pdf`.
///
/// Any unreadable input fails the whole merge; nothing partial is written.
pub fn merge(
    inputs: &[StoredInput],
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, ToolError> {
    let sources = inputs
        .iter()
        .map(|input| {
            checkpoint(cancel)?;
            load_structural(input)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut merged = Document::with_version("1.7");
    let root_pages_id = merged.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(sources.len());
    let mut total_pages = 0usize;

    for (mut doc, input) in sources.into_iter().zip(inputs) {
        doc.renumber_objects_with(merged.max_id + 1);
        merged.max_id = doc.max_id;

        let corrupt = |detail: String| ToolError::CorruptPdf {
            name: input.original_name.clone(),
            detail,
        };
        let catalog_id = doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| corrupt(format!("missing catalog: {e}")))?;
        let pages_id = doc
            .get_object(catalog_id)
            .and_then(Object::as_dict)
            .and_then(|catalog| catalog.get(b"Pages"))
            .and_then(Object::as_reference)
            .map_err(|e| corrupt(format!("missing page tree: {e}")))?;

        let count = doc.get_pages().len();
        doc.get_object_mut(pages_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| corrupt(format!("bad page tree: {e}")))?
            .set("Parent", root_pages_id);
        doc.objects.remove(&catalog_id);

        merged.objects.extend(doc.objects);
        kids.push(pages_id.into());
        total_pages += count;
    }

    merged.objects.insert(
        root_pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total_pages as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => root_pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    merged.prune_objects();
    merged.renumber_objects();
    merged.compress();

    checkpoint(cancel)?;
    let out = work_dir.join(OUTPUT_NAME);
    save_structural(&mut merged, &out)?;
    info!("Merged {} PDFs into {} pages", inputs.len(), total_pages);
    Ok(out)
}
