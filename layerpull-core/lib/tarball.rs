//! Extraction child-process management.
//!
//! Layer blobs are gzipped tar archives. Each one is streamed into a dedicated
//! `tar` child rooted at the snapshot under construction; the child sees EOF
//! on its stdin strictly before it is reaped.

use std::{path::Path, process::Stdio};

use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, Command},
};

use crate::{LayerpullError, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A running extractor child with its archive input stream.
#[derive(Debug)]
pub(crate) struct Extractor {
    child: Child,
    stdin: Option<ChildStdin>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Spawns an extractor rooted at `dir`.
///
/// `--no-same-owner` keeps unprivileged pulls working; `--numeric-owner`
/// avoids uid/gid name remapping when running privileged. The child is killed
/// if the handle is dropped without being reaped.
pub(crate) fn fork_tar(dir: &Path) -> LayerpullResult<Extractor> {
    let mut child = Command::new("tar")
        .arg("--numeric-owner")
        .arg("--no-same-owner")
        .args(["-x", "-z", "-C"])
        .arg(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| LayerpullError::Extractor("extractor has no stdin".to_string()))?;

    tracing::debug!(pid = ?child.id(), dir = %dir.display(), "extractor started");

    Ok(Extractor {
        child,
        stdin: Some(stdin),
    })
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Extractor {
    /// Writes one chunk of the archive into the child.
    pub(crate) async fn feed(&mut self, chunk: &[u8]) -> LayerpullResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| LayerpullError::Extractor("archive stream already closed".to_string()))?;
        stdin.write_all(chunk).await?;
        Ok(())
    }

    /// Closes the archive stream and reaps the child.
    ///
    /// The stream is dropped before the wait so the child observes EOF and can
    /// terminate; anything but a clean exit is an extraction failure.
    pub(crate) async fn finish(mut self) -> LayerpullResult<()> {
        drop(self.stdin.take());

        let status = self.child.wait().await?;
        if !status.success() {
            return Err(LayerpullError::Extractor(format!(
                "extractor exited with {status}"
            )));
        }

        Ok(())
    }

    /// Kills and reaps the child without waiting for it to drain its input.
    pub(crate) async fn abort(mut self) {
        drop(self.stdin.take());
        if let Err(err) = self.child.kill().await {
            tracing::warn!(?err, "failed to kill extractor");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};
    use tempfile::TempDir;

    fn gzipped_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn extracts_a_streamed_archive() {
        let dir = TempDir::new().unwrap();
        let archive = gzipped_tar(&[("hello.txt", b"hi there\n")]);

        let mut extractor = fork_tar(dir.path()).unwrap();
        for chunk in archive.chunks(7) {
            extractor.feed(chunk).await.unwrap();
        }
        extractor.finish().await.unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("hello.txt")).unwrap(),
            b"hi there\n"
        );
    }

    #[tokio::test]
    async fn garbage_input_fails_the_finish() {
        let dir = TempDir::new().unwrap();
        let mut extractor = fork_tar(dir.path()).unwrap();

        // Either the write hits a dead pipe or the child exits non-zero;
        // both surface as an error.
        let fed = extractor.feed(b"this is not a gzip stream").await;
        let finished = extractor.finish().await;
        assert!(fed.is_err() || finished.is_err());
    }

    #[tokio::test]
    async fn abort_reaps_the_child() {
        let dir = TempDir::new().unwrap();
        let extractor = fork_tar(dir.path()).unwrap();
        extractor.abort().await;
    }
}
