use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

// Finds the input device with the given name, or the host's default input
// device when no name is given.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("No default input device"),
        Some(target) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No input device named {:?}", target)),
    }
}

// Same as above for output devices.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("No default output device"),
        Some(target) => host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No output device named {:?}", target)),
    }
}

/// One-line summary of a device and its default config, for logs.
pub fn describe(device: &Device, input: bool) -> String {
    let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
    let config = if input {
        device.default_input_config()
    } else {
        device.default_output_config()
    };
    match config {
        Ok(cfg) => format!("{}({}ch, {}hz)", name, cfg.channels(), cfg.sample_rate().0),
        Err(_) => name,
    }
}
