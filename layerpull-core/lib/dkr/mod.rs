//! v1 registry pull protocol.
//!
//! This module drives one image pull end to end:
//! - resolving a repository tag against the index service
//! - following the registry endpoints and auth token the index hands out
//! - decoding the ancestry chain of content-addressed layers
//! - materializing each layer as a snapshot stacked on its parent

mod ident;
mod layer;
mod local;
#[cfg(test)]
pub(crate) mod mocks;
mod progress;
mod session;
mod wire;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use ident::*;
pub(crate) use layer::*;
pub(crate) use local::*;
pub(crate) use progress::*;
pub use session::*;
pub use wire::LAYERS_MAX;
pub(crate) use wire::*;
