//! The local-alias step run after a successful pull.

use std::path::{Path, PathBuf};

use crate::{
    LayerpullError, LayerpullResult,
    dkr::ident::MachineName,
    snapshot::CowFs,
};

/// Materializes a writable local alias of the pulled image's tip layer at
/// `image_root/{local}`.
///
/// A pre-existing alias is an error unless `force` is set, in which case it is
/// replaced.
pub(crate) async fn make_local_copy(
    cow: &dyn CowFs,
    image_root: &Path,
    tip_path: &Path,
    local: &MachineName,
    force: bool,
) -> LayerpullResult<PathBuf> {
    let local_path = image_root.join(local.as_str());

    if tokio::fs::try_exists(&local_path).await? {
        if !force {
            return Err(LayerpullError::LocalExists(local.to_string()));
        }
        tracing::info!(local = %local, "replacing existing local image");
        cow.remove(&local_path).await?;
    }

    cow.subvol_snapshot(tip_path, &local_path).await?;
    tracing::info!(local = %local, path = %local_path.display(), "local image created");

    Ok(local_path)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
