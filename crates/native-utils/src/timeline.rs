//! A frame-clocked mixer for audio segments scheduled at absolute start times.
//!
//! The output callback renders from it, the control side inserts and removes
//! segments. Time starts at zero when the timeline is created and advances
//! only as frames are rendered.

struct Segment {
    id: u64,
    start: u64,
    samples: Vec<f32>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

pub struct Timeline {
    sample_rate: u32,
    frames_played: u64,
    segments: Vec<Segment>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_played: 0,
            segments: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current playback position in seconds.
    pub fn now(&self) -> f64 {
        self.frames_played as f64 / self.sample_rate as f64
    }

    /// Schedules mono samples to start at `start_at` seconds.
    ///
    /// A start time already in the past is moved to the current position so
    /// the beginning of the segment is not lost.
    pub fn insert(&mut self, id: u64, start_at: f64, samples: Vec<f32>) {
        let start = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.segments.push(Segment {
            id,
            start: start.max(self.frames_played),
            samples,
        });
    }

    /// Drops a segment whether or not it started. Returns false if it was unknown.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.segments.len();
        self.segments.retain(|s| s.id != id);
        self.segments.len() != before
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.segments.is_empty()
    }

    /// Mixes the next `out.len()` mono frames and advances the clock.
    ///
    /// Returns the ids of segments that finished within this window.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<u64> {
        out.fill(0.0);
        let window_start = self.frames_played;
        let window_end = window_start + out.len() as u64;

        for segment in &self.segments {
            if segment.start >= window_end || segment.end() <= window_start {
                continue;
            }
            let from = segment.start.max(window_start);
            let to = segment.end().min(window_end);
            for frame in from..to {
                out[(frame - window_start) as usize] += segment.samples[(frame - segment.start) as usize];
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frames_played = window_end;
        let mut finished = Vec::new();
        self.segments.retain(|s| {
            if s.end() <= window_end {
                finished.push(s.id);
                false
            } else {
                true
            }
        });
        finished
    }
}
