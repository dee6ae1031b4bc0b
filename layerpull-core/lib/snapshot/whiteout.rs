//! Whiteout resolution for extracted layer trees.
//!
//! Stacked layer archives record deletions as marker files. After a layer has
//! been extracted on top of its parent snapshot the markers are turned into
//! real deletions: `.wh.<name>` removes the sibling `<name>`, and `.wh..wh.`
//! metadata entries (including the opaque-directory marker) are dropped.

use std::path::{Path, PathBuf};

use tokio::task;
use walkdir::WalkDir;

use crate::{LayerpullError, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The prefix for whiteout files in stacked layers.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// The prefix of layering-metadata entries that carry no deletion target.
pub const WHITEOUT_META_PREFIX: &str = ".wh..wh.";

/// The opaque directory marker file name used in stacked layers.
pub const OPAQUE_WHITEOUT_MARKER: &str = ".wh..wh..opq";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves every whiteout marker below `root`, returning how many were
/// processed.
pub async fn resolve_whiteouts(root: &Path) -> LayerpullResult<usize> {
    let root = root.to_path_buf();
    task::spawn_blocking(move || resolve_tree(&root))
        .await
        .map_err(LayerpullError::custom)?
}

fn resolve_tree(root: &Path) -> LayerpullResult<usize> {
    // Collect first: deleting entries while the walker holds their parent
    // directory open confuses the traversal.
    let mut markers: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(LayerpullError::custom)?;
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(WHITEOUT_PREFIX) {
            markers.push(entry.path().to_path_buf());
        }
    }

    let mut resolved = 0;
    for marker in markers {
        let Some(name) = marker.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        if !name.starts_with(WHITEOUT_META_PREFIX) {
            let target = marker.with_file_name(&name[WHITEOUT_PREFIX.len()..]);
            remove_entry(&target)?;
            tracing::trace!(target = %target.display(), "resolved whiteout");
        }

        remove_entry(&marker)?;
        resolved += 1;
    }

    Ok(resolved)
}

/// Removes a file, symlink or directory tree, tolerating entries a previous
/// marker already took out.
fn remove_entry(path: &Path) -> LayerpullResult<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    if metadata.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
