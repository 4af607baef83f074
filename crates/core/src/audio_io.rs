use crate::error::DeviceError;
use crate::events::EventSink;
use recall_native_utils::audio::PcmBuffer;

/// Identifies one scheduled output buffer within a playback context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Samples per block delivered through [`EventSink::capture_block`].
    pub block_size: usize,
}

/// Access to the platform's microphone and speaker.
pub trait AudioBackend {
    /// Acquires the microphone. Blocks are only delivered after [`CaptureStream::start`].
    fn open_capture(
        &mut self,
        config: CaptureConfig,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureStream>, DeviceError>;

    /// Opens an output context whose clock starts at zero. Finished buffers
    /// are reported through [`EventSink::playback_ended`].
    fn open_playback(
        &mut self,
        sample_rate: u32,
        sink: EventSink,
    ) -> Result<Box<dyn PlaybackContext>, DeviceError>;
}

pub trait CaptureStream {
    fn start(&mut self) -> Result<(), DeviceError>;
    fn close(&mut self);
}

#[cfg_attr(test, mockall::automock)]
pub trait PlaybackContext {
    /// Seconds since the context was opened.
    fn current_time(&self) -> f64;
    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> PlaybackHandle;
    fn stop(&mut self, handle: PlaybackHandle);
    fn close(&mut self);
}
