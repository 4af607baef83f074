pub mod audio;
pub mod timeline;

#[cfg(feature = "device")]
pub mod device;
