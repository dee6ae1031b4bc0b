//! The layer-chain driver.
//!
//! Walks the ancestry in parent-first order, reuses layers that are already
//! materialized under the image root and builds the missing ones: snapshot the
//! parent, stream the archive into an extractor, resolve whiteouts, seal the
//! snapshot and promote it with one atomic rename.

use std::path::Path;

use futures::StreamExt;
use tokio::fs::DirBuilder;

use crate::{
    LayerpullError, LayerpullResult,
    dkr::{
        ident::LayerId,
        progress::{JobKind, ProgressReporter},
        session::{Pull, Session},
        wire::{self, WireHeaders},
    },
    snapshot, tarball,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Drives the DOWNLOAD phase of one pull.
pub(crate) struct LayerDriver<'a> {
    pub(crate) pull: &'a Pull,
    pub(crate) progress: &'a ProgressReporter,
}

/// What the driver did for the whole chain.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LayerStats {
    /// Layers fetched and materialized by this pull.
    pub(crate) pulled: usize,
    /// Layers that were already present and were reused as-is.
    pub(crate) reused: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerDriver<'_> {
    /// Materializes every layer of the session's ancestry that is not yet
    /// present under the image root.
    pub(crate) async fn run(&self, session: &mut Session) -> LayerpullResult<LayerStats> {
        let total = session.ancestry.len();
        let mut stats = LayerStats::default();

        loop {
            // Skip over everything that is already materialized. The presence
            // of the final directory is the ground truth; no request is issued
            // for such layers.
            while session.current_ancestry < total {
                let layer = &session.ancestry[session.current_ancestry];
                if !tokio::fs::try_exists(self.pull.layer_path(layer)).await? {
                    break;
                }
                tracing::info!(layer = %layer.short(), "layer already materialized, reusing");
                session.current_ancestry += 1;
                stats.reused += 1;
            }

            self.progress.layer_counts(session.current_ancestry, total);
            if session.current_ancestry == total {
                return Ok(stats);
            }

            let layer = session.ancestry[session.current_ancestry].clone();
            let headers = self.fetch_layer(session, &layer).await?;
            session.absorb(headers);
            session.current_ancestry += 1;
            stats.pulled += 1;
        }
    }

    /// Fetches and materializes one layer.
    async fn fetch_layer(
        &self,
        session: &Session,
        layer: &LayerId,
    ) -> LayerpullResult<WireHeaders> {
        let url = format!(
            "{}/v1/images/{}/layer",
            self.pull.registry_base(session)?,
            layer
        );
        let response = self.pull.issue(JobKind::Layer, &url, session.token.as_deref()).await?;
        let headers = wire::sift_headers(response.headers())?;

        let final_path = self.pull.layer_path(layer);
        let temp_path = layerpull_utils::temp_sibling(&final_path)?;
        if let Some(parent) = final_path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)
                .await?;
        }

        // Last-resort scratch cleanup if the pull task is dropped mid-stream;
        // regular error paths remove the snapshot through the backend below.
        let cleanup = scopeguard::guard(temp_path.clone(), |path| {
            let _ = std::fs::remove_dir_all(&path);
        });

        // The transport is ready to deliver the body: acquire the snapshot and
        // start the extractor before consuming the first chunk.
        if session.current_ancestry > 0 {
            let parent = self.pull.layer_path(&session.ancestry[session.current_ancestry - 1]);
            self.pull.cow().subvol_snapshot(&parent, &temp_path).await?;
        } else {
            self.pull.cow().subvol_make(&temp_path).await?;
        }

        let mut extractor = tarball::fork_tar(&temp_path)?;

        let total_bytes = response.content_length();
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        let streamed: LayerpullResult<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                extractor.feed(&chunk).await?;
                received += chunk.len() as u64;
                if let Some(total) = total_bytes {
                    if total > 0 {
                        let percent = ((100 * received) / total).min(100) as u8;
                        self.progress.job(JobKind::Layer, percent);
                    }
                }
            }
            Ok(())
        }
        .await;

        if let Err(err) = streamed {
            extractor.abort().await;
            self.discard_temp(&temp_path).await;
            return Err(err);
        }

        // EOF strictly before the wait.
        if let Err(err) = extractor.finish().await {
            self.discard_temp(&temp_path).await;
            return Err(err);
        }

        if let Err(err) = self.promote(&temp_path, &final_path).await {
            self.discard_temp(&temp_path).await;
            return Err(err);
        }

        scopeguard::ScopeGuard::into_inner(cleanup);
        self.progress.job(JobKind::Layer, 100);
        tracing::info!(layer = %layer.short(), path = %final_path.display(), "layer materialized");
        Ok(headers)
    }

    /// Seals the finished snapshot and renames it into place. The rename is
    /// the commit point.
    async fn promote(&self, temp_path: &Path, final_path: &Path) -> LayerpullResult<()> {
        snapshot::resolve_whiteouts(temp_path).await?;
        self.pull.cow().set_read_only(temp_path, true).await?;

        match tokio::fs::rename(temp_path, final_path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Another pull may have promoted the same layer first; both
                // builds carry equivalent content.
                if tokio::fs::try_exists(final_path).await.unwrap_or(false) {
                    tracing::info!(
                        path = %final_path.display(),
                        "layer materialized concurrently, discarding duplicate"
                    );
                    self.discard_temp(temp_path).await;
                    Ok(())
                } else {
                    Err(LayerpullError::IoError(err))
                }
            }
        }
    }

    async fn discard_temp(&self, temp_path: &Path) {
        if !tokio::fs::try_exists(temp_path).await.unwrap_or(false) {
            return;
        }
        let _ = self.pull.cow().set_read_only(temp_path, false).await;
        if let Err(err) = self.pull.cow().remove(temp_path).await {
            tracing::warn!(?err, temp = %temp_path.display(), "failed to remove scratch snapshot");
        }
    }
}
