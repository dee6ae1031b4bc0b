//! Default values and constants used throughout the layerpull project.

use std::{path::PathBuf, sync::LazyLock};

use crate::{IMAGES_SUBDIR, LAYERPULL_HOME_DIR};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default index service the pull engine talks to.
pub const DEFAULT_INDEX_URL: &str = "https://index.docker.io";

/// The default tag resolved when none is given.
pub const DEFAULT_TAG: &str = "latest";

/// The path where all layerpull global data is stored.
pub static DEFAULT_LAYERPULL_HOME: LazyLock<PathBuf> =
    LazyLock::new(|| dirs::home_dir().unwrap().join(LAYERPULL_HOME_DIR));

/// The default directory materialized layers are stored under.
pub static DEFAULT_IMAGE_ROOT: LazyLock<PathBuf> =
    LazyLock::new(|| DEFAULT_LAYERPULL_HOME.join(IMAGES_SUBDIR));

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
