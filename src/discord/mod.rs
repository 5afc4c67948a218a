pub mod client;
pub mod embeds;
pub mod errors;
pub mod types;

pub use client::{DiscordClient, PlatformOps};
pub use errors::PlatformError;
pub use types::*;
