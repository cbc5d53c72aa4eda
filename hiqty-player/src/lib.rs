//! Playback side of hiqty: change watcher, reconciliation controller and
//! per-guild playback sessions.

pub mod codec;
pub mod controller;
pub mod error;
pub mod registry;
pub mod session;
pub mod watcher;

pub use controller::{PlayerController, ReconcileOutcome};
pub use error::{Error, Result};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{PlaybackSession, SessionContext, SessionExit};
pub use watcher::{KeyStream, Watcher};
