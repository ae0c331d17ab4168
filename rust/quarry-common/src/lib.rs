//! Core definitions (error taxonomy and size helpers), relied upon by all quarry-* crates.

pub mod error;
pub mod result;
pub mod sizes;

pub use error::{Error, ErrorKind};
pub use result::Result;
