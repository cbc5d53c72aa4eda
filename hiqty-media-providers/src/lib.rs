// hiqty Provider Clients
//
// This crate contains pure HTTP client implementations for the streaming services
// hiqty can queue tracks from. These clients are independent of the
// ResolutionBackend trait and can be used standalone.
//
// Architecture:
// - hiqty-media-providers: Pure HTTP clients (SoundCloud)
// - hiqty-core/media: ResolutionBackend adapters calling these clients

// Shared error types
pub mod error;

// HTTP clients (no ResolutionBackend dependency)
pub mod soundcloud;

// Re-export client types for convenience
pub use error::ProviderClientError;
pub use soundcloud::SoundCloudClient;
