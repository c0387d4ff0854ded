//! Program-shaped value types: access paths and canonical names.

mod access;
mod canonical;

pub use access::{AccessPath, Path, PathElement, Root};
pub use canonical::CanonicalName;
