//! Storage traits and the in-memory backend.
//!
//! The traits define the abstract interface for storage backends; the
//! in-memory implementations back embedded use and tests.

mod locks;
pub mod memory;
mod traits;

pub use locks::KeyedLocks;
pub use memory::{InMemoryAssessmentStore, InMemoryGraphStore, InMemoryResourceStore, InMemoryStores};
pub use traits::{AssessmentStore, GraphSnapshot, GraphStore, ResourceStore, StorageError};
