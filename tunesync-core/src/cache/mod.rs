pub mod key_builder;
pub mod redis_store;
pub mod store;
pub mod sync_state;

pub use key_builder::KeyBuilder;
pub use redis_store::RedisStore;
pub use store::{KeyValueStore, MemoryStore};
pub use sync_state::SyncStateCache;
