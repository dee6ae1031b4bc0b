//! Utility functions for working with environment variables.

use std::path::PathBuf;

use crate::{DEFAULT_IMAGE_ROOT, DEFAULT_INDEX_URL};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable overriding the default index service URL
pub const LAYERPULL_INDEX_URL_ENV_VAR: &str = "LAYERPULL_INDEX_URL";

/// Environment variable overriding the default image root directory
pub const LAYERPULL_IMAGE_ROOT_ENV_VAR: &str = "LAYERPULL_IMAGE_ROOT";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the index service URL.
/// If the LAYERPULL_INDEX_URL environment variable is set, returns that value.
/// Otherwise, returns the default index URL.
pub fn get_index_url() -> String {
    if let Ok(index_url) = std::env::var(LAYERPULL_INDEX_URL_ENV_VAR) {
        index_url
    } else {
        DEFAULT_INDEX_URL.to_string()
    }
}

/// Returns the path layers are materialized under.
/// If the LAYERPULL_IMAGE_ROOT environment variable is set, returns that path.
/// Otherwise, returns the default image root path.
pub fn get_image_root_path() -> PathBuf {
    if let Ok(image_root) = std::env::var(LAYERPULL_IMAGE_ROOT_ENV_VAR) {
        PathBuf::from(image_root)
    } else {
        DEFAULT_IMAGE_ROOT.to_owned()
    }
}
