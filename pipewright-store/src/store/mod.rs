mod trait_store;
mod types;

pub use trait_store::{ArtifactStore, StoreError};
pub use types::{ArtifactMeta, StoredArtifact};

pub(crate) fn check_hash(hash: &str) -> Result<(), StoreError> {
    if pipewright_core::is_content_hash(hash) {
        Ok(())
    } else {
        Err(StoreError::InvalidHash(hash.to_string()))
    }
}
