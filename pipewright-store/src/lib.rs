#![forbid(unsafe_code)]

pub mod fs;
pub mod memory;
pub mod store;

pub use crate::fs::FsArtifactStore;
pub use crate::memory::MemoryArtifactStore;
pub use crate::store::{ArtifactMeta, ArtifactStore, StoreError, StoredArtifact};
