//! SoundCloud Provider Client
//!
//! Pure HTTP client for the SoundCloud public API, independent of `ResolutionBackend`.
//!
//! # Example
//!
//! ```no_run
//! use hiqty_media_providers::soundcloud::SoundCloudClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SoundCloudClient::new("client-id")?;
//! let tracks = client.resolve("https://soundcloud.com/artist/song").await?.into_tracks();
//! let stream = client.stream_url(&tracks[0].id.to_string());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod types;

pub use client::{SoundCloudClient, DEFAULT_API_BASE};
pub use types::*;
