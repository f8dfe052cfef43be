//! CRUD and merge semantics for every entity family in the substrate. One
//! submodule per family; each talks to [`crate::store`] directly rather
//! than through a single do-everything trait.

pub mod artifact;
pub mod claim;
pub mod community;
pub mod concept;
pub mod graphspace;
pub mod merge;
pub mod model;
pub mod relationship;
pub mod source;

pub use model::*;

pub use concept::row_to_concept;
