//! Bootstrap module for initializing a hiqty node
//!
//! This module handles:
//! - Configuration loading
//! - Store connection and resolution backend registration

pub mod config;
pub mod services;

pub use config::load_config;
pub use services::{init_backends, init_services, Services};
