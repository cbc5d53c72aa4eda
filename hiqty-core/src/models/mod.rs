pub mod id;
pub mod state;

pub use id::{generate_id, lease_token};
pub use state::{DesiredState, GuildStatus};
