//! `layerpull_utils::path` is a module containing path utilities for the layerpull project.

use std::path::{Path, PathBuf};

use crate::{LayerpullUtilsError, LayerpullUtilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory name for layerpull's global data
pub const LAYERPULL_HOME_DIR: &str = ".layerpull";

/// The directory where materialized image layers are stored
///
/// Example: <LAYERPULL_HOME_DIR>/<IMAGES_SUBDIR>
pub const IMAGES_SUBDIR: &str = "images";

/// The prefix of every materialized layer directory under an image root
///
/// Example: <IMAGE_ROOT>/<LAYER_DIR_PREFIX><LAYER_ID>
pub const LAYER_DIR_PREFIX: &str = ".dkr-";

/// The prefix of scratch paths built next to their final destination
///
/// Example: <IMAGE_ROOT>/<TEMP_PREFIX><LAYER_DIR_PREFIX><LAYER_ID><NONCE>
pub const TEMP_PREFIX: &str = ".#";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the directory name a layer with the given id is materialized under.
pub fn layer_dir_name(layer_id: &str) -> String {
    format!("{}{}", LAYER_DIR_PREFIX, layer_id)
}

/// Builds a randomized scratch sibling for `path`.
///
/// The result lives in the same directory as `path` so that the final promotion
/// is a single atomic rename on the same filesystem. The name is prefixed with
/// [`TEMP_PREFIX`] and suffixed with a random nonce so concurrent builders never
/// collide.
pub fn temp_sibling(path: &Path) -> LayerpullUtilsResult<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            LayerpullUtilsError::PathValidation(format!(
                "path has no usable file name: {}",
                path.display()
            ))
        })?;

    let nonce: u64 = rand::random();
    let temp_name = format!(
        "{}{}{}",
        TEMP_PREFIX,
        file_name,
        hex::encode(nonce.to_be_bytes())
    );

    Ok(path.with_file_name(temp_name))
}

/// Whether `file_name` names a scratch path produced by [`temp_sibling`].
pub fn is_temp_name(file_name: &str) -> bool {
    file_name.starts_with(TEMP_PREFIX)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_dir_name_prepends_prefix() {
        assert_eq!(layer_dir_name("abc123"), ".dkr-abc123");
    }

    #[test]
    fn temp_sibling_stays_in_parent_directory() {
        let path = Path::new("/images/.dkr-abc123");
        let temp = temp_sibling(path).unwrap();
        assert_eq!(temp.parent(), path.parent());

        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".#.dkr-abc123"));
        assert!(is_temp_name(name));
    }

    #[test]
    fn temp_sibling_is_randomized() {
        let path = Path::new("/images/.dkr-abc123");
        let a = temp_sibling(path).unwrap();
        let b = temp_sibling(path).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn temp_sibling_rejects_bare_root() {
        assert!(temp_sibling(Path::new("/")).is_err());
    }

    #[test]
    fn final_names_are_not_temp_names() {
        assert!(!is_temp_name(&layer_dir_name("abc123")));
    }
}
