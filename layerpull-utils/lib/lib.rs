//! `layerpull-utils` is a library containing general utilities for the layerpull project.

#![warn(missing_docs)]

pub mod defaults;
pub mod env;
pub mod error;
pub mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use env::*;
pub use error::*;
pub use path::*;
