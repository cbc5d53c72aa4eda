// Resolution Backend Module
//
// Pluggable services that turn URLs into queue entries and queue entries
// into audio byte streams

pub mod envelope;
pub mod error;
pub mod registry;
pub mod soundcloud;
pub mod traits;

pub use envelope::{TrackEnvelope, TrackInfo, TrackUser};
pub use error::BackendError;
pub use registry::BackendRegistry;
pub use soundcloud::{SoundCloudBackend, SoundCloudTrack, SOUNDCLOUD_ID};
pub use traits::{Attribution, ByteStream, MediaRequest, ResolutionBackend, ResolvedTrack};
