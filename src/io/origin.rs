use async_trait::async_trait;
use bytes::Bytes;

use crate::asset::OriginAssetRef;
use crate::error::IoError;

/// Read-only access to the store holding original images.
///
/// Originals are immutable: once an asset exists its bytes never change, which
/// is what allows derivatives to be cached by asset reference alone.
/// Implementations must be thread-safe; a single store is shared by every
/// in-flight request.
#[async_trait]
pub trait OriginStore: Send + Sync {
    /// Fetch the complete bytes of an original.
    ///
    /// Returns `IoError::NotFound` if the asset does not exist.
    async fn get(&self, asset: &OriginAssetRef) -> Result<Bytes, IoError>;
}
