//! Microphone and speaker access through cpal.
//!
//! cpal streams are not `Send`, so everything here lives on the thread that
//! drives the orchestrator. Audio callbacks only talk to the orchestrator
//! through the non-blocking [`EventSink`] methods.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BuildStreamError, DefaultStreamConfigError, PlayStreamError, Stream};
use recall_core::audio_io::{
    AudioBackend, CaptureConfig, CaptureStream, PlaybackContext, PlaybackHandle,
};
use recall_core::error::DeviceError;
use recall_core::events::EventSink;
use recall_native_utils::audio::{self, BlockAssembler, PcmBuffer, StreamResampler};
use recall_native_utils::device;
use recall_native_utils::timeline::Timeline;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Opens the configured (or default) devices on each connect.
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(
        &mut self,
        config: CaptureConfig,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        let input = device::get_or_default_input(self.input_device.as_deref())
            .map_err(|e| DeviceError::NoDevice(format!("{:#}", e)))?;
        let supported = input.default_input_config().map_err(config_error)?;
        let channels = supported.channels() as usize;
        let device_rate = supported.sample_rate().0;
        let stream_config = supported.config();
        tracing::info!("Using input device: {}", device::describe(&input, true));

        let mut assembler = BlockAssembler::new(device_rate, config.sample_rate, config.block_size)
            .map_err(|e| DeviceError::Stream(format!("{:#}", e)))?;

        // Downmix, resample and cut into blocks; blocks are dropped, never
        // buffered, if the orchestrator falls behind.
        let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = audio::downmix(data, channels);
            for block in assembler.push(&mono) {
                sink.capture_block(block);
            }
        };

        let stream = input
            .build_input_stream(
                &stream_config,
                input_data_fn,
                move |err| tracing::error!("An error occurred on input stream: {}", err),
                None,
            )
            .map_err(build_error)?;

        Ok(Box::new(CpalCapture {
            stream: Some(stream),
        }))
    }

    fn open_playback(
        &mut self,
        sample_rate: u32,
        sink: EventSink,
    ) -> Result<Box<dyn PlaybackContext>, DeviceError> {
        let output = device::get_or_default_output(self.output_device.as_deref())
            .map_err(|e| DeviceError::NoDevice(format!("{:#}", e)))?;
        let supported = output.default_output_config().map_err(config_error)?;
        let channels = (supported.channels() as usize).max(1);
        let device_rate = supported.sample_rate().0;
        let stream_config = supported.config();
        tracing::info!("Using output device: {}", device::describe(&output, false));

        // Segments are mixed at the source rate and the mix is resampled as one
        // continuous stream, so back-to-back chunks meet without a seam.
        let resampler = StreamResampler::new(sample_rate, device_rate)
            .map_err(|e| DeviceError::Stream(format!("{:#}", e)))?;
        let mixer = Arc::new(Mutex::new(Mixer {
            timeline: Timeline::new(sample_rate),
            resampler,
        }));
        let shared = mixer.clone();
        let mut mono = Vec::new();

        let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            mono.resize(data.len() / channels, 0.0);
            let mut finished = Vec::new();
            // Never wait on the scheduler from the audio thread: a contended
            // period plays silence.
            match shared.try_lock() {
                Ok(mut mixer) => {
                    let Mixer {
                        timeline,
                        resampler,
                    } = &mut *mixer;
                    resampler.fill(&mut mono, |chunk| finished.extend(timeline.render(chunk)));
                }
                Err(_) => mono.fill(0.0),
            }
            for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(*sample);
            }
            for id in finished {
                sink.playback_ended(PlaybackHandle(id));
            }
        };

        let stream = output
            .build_output_stream(
                &stream_config,
                output_data_fn,
                move |err| tracing::error!("An error occurred on output stream: {}", err),
                None,
            )
            .map_err(build_error)?;
        stream.play().map_err(play_error)?;

        Ok(Box::new(CpalPlayback {
            stream: Some(stream),
            mixer,
            source_rate: sample_rate,
            next_id: 0,
        }))
    }
}

struct CpalCapture {
    stream: Option<Stream>,
}

impl CaptureStream for CpalCapture {
    fn start(&mut self) -> Result<(), DeviceError> {
        match self.stream.as_ref() {
            Some(stream) => stream.play().map_err(play_error),
            None => Err(DeviceError::Stream("capture already closed".to_string())),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause input stream: {}", e);
            }
        }
    }
}

/// What the output callback renders from.
struct Mixer {
    timeline: Timeline,
    resampler: StreamResampler,
}

/// A playback context backed by a [`Timeline`] at the model's rate.
struct CpalPlayback {
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
    /// Rate of the timeline and of the buffers handed to [`PlaybackContext::schedule`].
    source_rate: u32,
    next_id: u64,
}

impl CpalPlayback {
    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackContext for CpalPlayback {
    fn current_time(&self) -> f64 {
        self.mixer().timeline.now()
    }

    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> PlaybackHandle {
        self.next_id += 1;
        let id = self.next_id;
        let samples = if buffer.sample_rate == 0 || buffer.sample_rate == self.source_rate {
            buffer.samples
        } else {
            match audio::resample_all(&buffer.samples, buffer.sample_rate, self.source_rate) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!("Failed to resample model audio, playing it silent: {:#}", e);
                    Vec::new()
                }
            }
        };
        self.mixer().timeline.insert(id, start_at, samples);
        PlaybackHandle(id)
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        let mut mixer = self.mixer();
        if mixer.timeline.remove(handle.0) {
            // Already resampled audio of the cut segment must not leak out.
            mixer.resampler.reset();
        }
    }

    fn close(&mut self) {
        {
            let mut mixer = self.mixer();
            mixer.timeline.clear();
            mixer.resampler.reset();
        }
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause output stream: {}", e);
            }
        }
    }
}

/// Platform errors only say "permission" in their text, so look for it there.
fn classify(description: String) -> DeviceError {
    let lower = description.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        DeviceError::PermissionDenied(description)
    } else {
        DeviceError::Stream(description)
    }
}

fn config_error(e: DefaultStreamConfigError) -> DeviceError {
    let description = e.to_string();
    match e {
        DefaultStreamConfigError::DeviceNotAvailable => DeviceError::NoDevice(description),
        _ => classify(description),
    }
}

fn build_error(e: BuildStreamError) -> DeviceError {
    let description = e.to_string();
    match e {
        BuildStreamError::DeviceNotAvailable => DeviceError::NoDevice(description),
        _ => classify(description),
    }
}

fn play_error(e: PlayStreamError) -> DeviceError {
    let description = e.to_string();
    match e {
        PlayStreamError::DeviceNotAvailable => DeviceError::NoDevice(description),
        _ => classify(description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_detects_permission_problems() {
        assert!(matches!(
            classify("A backend-specific error has occurred: Permission denied".to_string()),
            DeviceError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify("The requested stream configuration is not supported".to_string()),
            DeviceError::Stream(_)
        ));
    }

    #[test]
    fn test_missing_device_maps_to_no_device() {
        assert!(matches!(
            build_error(BuildStreamError::DeviceNotAvailable),
            DeviceError::NoDevice(_)
        ));
        assert!(matches!(
            config_error(DefaultStreamConfigError::StreamTypeNotSupported),
            DeviceError::Stream(_)
        ));
    }
}
