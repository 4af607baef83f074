use crate::audio_io::{PlaybackContext, PlaybackHandle};
use crate::error::DecodeError;
use recall_native_utils::audio::{self, OUTPUT_SAMPLE_RATE, PcmBuffer};
use std::collections::HashMap;

/// Chains model audio chunks back to back on a playback context.
///
/// `cursor` is the context time at which the next chunk may start. It only
/// moves forward, except on [`PlaybackScheduler::interrupt`] which resets it to
/// the origin so the next chunk starts immediately.
///
/// Scheduled buffers are remembered with their end time until the context
/// reports them finished. An end report can be lost, so buffers whose end has
/// already passed are forgotten on the next enqueue.
pub struct PlaybackScheduler {
    context: Box<dyn PlaybackContext>,
    cursor: f64,
    in_flight: HashMap<PlaybackHandle, f64>,
}

impl PlaybackScheduler {
    pub fn new(context: Box<dyn PlaybackContext>) -> Self {
        Self {
            context,
            cursor: 0.0,
            in_flight: HashMap::new(),
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Decodes a wire payload and queues it. On a decode error nothing changes.
    pub fn enqueue_wire(&mut self, payload: &str) -> Result<f64, DecodeError> {
        let buffer = audio::decode_from_wire(payload, OUTPUT_SAMPLE_RATE)?;
        Ok(self.enqueue(buffer))
    }

    /// Queues a buffer after everything already scheduled; returns its start time.
    pub fn enqueue(&mut self, buffer: PcmBuffer) -> f64 {
        let now = self.context.current_time();
        self.in_flight.retain(|_, end| *end > now);

        let start = self.cursor.max(now);
        let duration = buffer.duration();
        let handle = self.context.schedule(buffer, start);
        self.cursor = start + duration;
        self.in_flight.insert(handle, self.cursor);
        start
    }

    /// Forgets a buffer the context reported as finished.
    pub fn finished(&mut self, handle: PlaybackHandle) {
        self.in_flight.remove(&handle);
    }

    /// Stops everything scheduled and rewinds the cursor.
    pub fn interrupt(&mut self) {
        for (handle, _) in self.in_flight.drain() {
            self.context.stop(handle);
        }
        self.cursor = 0.0;
    }

    pub fn shutdown(mut self) {
        self.interrupt();
        self.context.close();
    }
}
