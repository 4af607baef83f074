pub mod config;
pub mod cpal_backend;
pub mod gemini_adapter;
pub mod presenter;
