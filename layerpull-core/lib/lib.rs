//! `layerpull-core` implements a pull engine for v1-style container-image
//! registries.
//!
//! A pull resolves a repository tag against an index service, follows the
//! registry endpoints the index hands out, decodes the image's ancestry chain
//! and materializes every layer as a read-only copy-on-write snapshot stacked
//! on its parent under a local image root. Layers that are already
//! materialized are reused; promotion into the image root is a single atomic
//! rename.
//!
//! # Usage
//!
//! ```no_run
//! use layerpull_core::{Pull, PullRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pull = Pull::new("https://index.docker.io", "/var/lib/layerpull/images")?;
//!
//!     let outcome = pull
//!         .start(PullRequest::builder().name("library/alpine").build())
//!         .await?;
//!
//!     println!("tip layer at {}", outcome.get_path().display());
//!     Ok(())
//! }
//! ```

pub mod dkr;
pub mod error;
pub mod snapshot;

mod tarball;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use dkr::*;
pub use error::*;
pub use snapshot::{CowFs, DirCow};
