pub mod geo_cache;
pub mod object_cache;
pub mod traits;

pub use geo_cache::GeoCache;
pub use object_cache::create_store;
pub use traits::{CacheEntry, GeoCacheStore};
