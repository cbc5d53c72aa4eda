pub mod bootstrap;
pub mod config;
pub mod error;
pub mod keys;
pub mod lease;
pub mod logging;
pub mod media;
pub mod models;
pub mod queue;
pub mod store;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use keys::KeyBuilder;
pub use lease::{Lease, LeaseManager};
pub use models::DesiredState;
pub use store::{MemoryStore, RedisStore, Store};
