mod client;
pub mod types;

pub use client::config::{Config, ConfigBuilder};
pub use client::consts::{BASE_URL as DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use client::{GeminiClient, ServerRx, connect};
