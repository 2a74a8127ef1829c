//! Concrete [`Tier`] implementations.
//!
//! - [`MemoryTier`]: a bounded, private in-process tier.
//! - [`StoreTier`]: adapts any [`Store`] of bytes, such as the [`FsStore`] or the [`MemoryStore`].

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::caching::{ConfigError, Tier};
use crate::config::TierConfig;

mod fs;
mod memory;
mod store;

pub use fs::{FsStore, MAX_PATH};
pub(crate) use fs::validate_root;
pub use memory::MemoryTier;
pub use store::{Codec, JsonCodec, KeyHasher, MemoryStore, Store, StoreTier, sha256_hex};

/// Creates the tiers described by `configs`, in order.
///
/// Persistent tiers encode values as JSON and store them under the SHA-256 hash of their key.
pub fn build_tiers<V>(configs: &[TierConfig]) -> Result<Vec<Arc<dyn Tier<V>>>, ConfigError>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    configs
        .iter()
        .map(|config| {
            config.validate()?;
            let tier: Arc<dyn Tier<V>> = match config {
                TierConfig::Memory(config) => Arc::new(MemoryTier::new(config.capacity, config.ttl)),
                TierConfig::Filesystem(config) => {
                    let store = FsStore::new(&config.path)?;
                    tracing::debug!(path = %config.path.display(), "Opened file system tier");
                    Arc::new(
                        StoreTier::new(store, config.ttl)
                            .with_shared(config.shared)
                            .with_rejection_safe(config.rejection_safe),
                    )
                }
            };
            Ok(tier)
        })
        .collect()
}
