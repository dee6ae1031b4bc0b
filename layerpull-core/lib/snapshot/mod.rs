//! Copy-on-write snapshot primitives used to materialize layers.
//!
//! The pull engine only ever touches snapshots through the [`CowFs`] seam:
//! create a fresh subvolume, snapshot an existing one, flip it read-only,
//! remove it. The shipped [`DirCow`] backend implements those operations on
//! plain directories, which is the portable fallback when no snapshotting
//! filesystem is available; a btrfs-native backend can provide the same trait.

mod whiteout;

use std::{
    fs::Permissions,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs, task};
use walkdir::WalkDir;

use crate::{LayerpullError, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use whiteout::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Filesystem operations the layer driver builds snapshots with.
#[async_trait]
pub trait CowFs: Send + Sync {
    /// Creates a fresh, writable subvolume at `path`.
    async fn subvol_make(&self, path: &Path) -> LayerpullResult<()>;

    /// Snapshots the subvolume at `src` into a writable copy at `dst`.
    async fn subvol_snapshot(&self, src: &Path, dst: &Path) -> LayerpullResult<()>;

    /// Flips the subvolume at `path` read-only (or writable again).
    async fn set_read_only(&self, path: &Path, read_only: bool) -> LayerpullResult<()>;

    /// Removes the subvolume at `path` and everything below it.
    async fn remove(&self, path: &Path) -> LayerpullResult<()>;
}

/// Plain-directory snapshot backend.
///
/// Snapshots are recursive copies, read-only means stripping the write bits
/// from the subvolume root. Contents keep their extracted permissions either
/// way, matching what a filesystem-level snapshot would preserve.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirCow;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CowFs for DirCow {
    async fn subvol_make(&self, path: &Path) -> LayerpullResult<()> {
        fs::create_dir(path).await?;
        Ok(())
    }

    async fn subvol_snapshot(&self, src: &Path, dst: &Path) -> LayerpullResult<()> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(LayerpullError::custom)??;
        Ok(())
    }

    async fn set_read_only(&self, path: &Path, read_only: bool) -> LayerpullResult<()> {
        let mode = if read_only { 0o555 } else { 0o755 };
        fs::set_permissions(path, Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> LayerpullResult<()> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || remove_tree(&path))
            .await
            .map_err(LayerpullError::custom)??;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn copy_tree(src: &Path, dst: &Path) -> LayerpullResult<()> {
    // Directory modes are applied after the walk: a read-only directory copied
    // verbatim would reject its own children while they are still being
    // populated.
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(LayerpullError::custom)?;
        let target: PathBuf = match entry.path().strip_prefix(src) {
            Ok(rel) if rel.as_os_str().is_empty() => dst.to_path_buf(),
            Ok(rel) => dst.join(rel),
            Err(err) => return Err(LayerpullError::custom(err)),
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            let mode = entry
                .metadata()
                .map_err(LayerpullError::custom)?
                .permissions()
                .mode();
            std::fs::create_dir(&target)?;
            std::fs::set_permissions(&target, Permissions::from_mode(mode | 0o700))?;
            dir_modes.push((target, mode));
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    for (dir, mode) in dir_modes {
        std::fs::set_permissions(&dir, Permissions::from_mode(mode))?;
    }

    // The copy is a writable snapshot even when the source root was sealed.
    std::fs::set_permissions(dst, Permissions::from_mode(0o755))?;
    Ok(())
}

fn remove_tree(path: &Path) -> LayerpullResult<()> {
    // Sealed roots and read-only inner directories would make the removal
    // fail half-way, so restore write bits on the way down first.
    for entry in WalkDir::new(path).into_iter().flatten() {
        if entry.file_type().is_dir() {
            let _ = std::fs::set_permissions(entry.path(), Permissions::from_mode(0o755));
        }
    }

    std::fs::remove_dir_all(path)?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
