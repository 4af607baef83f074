use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::VecDeque;

/// Sample rate of the microphone audio uploaded to the realtime endpoint.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of the model audio received from the realtime endpoint.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// MIME tag attached to every uploaded chunk.
pub const UPLOAD_MIME_TYPE: &str = "audio/pcm;rate=16000";
/// Multiplier applied to the RMS of a block before it is shown as a level.
pub const VOLUME_GAIN: f32 = 5.0;

/// Number of frames fed to the resampler per call.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("audio payload is empty")]
    Empty,
    #[error("audio payload has an odd byte length ({0})")]
    OddLength(usize),
    #[error("audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// An encoded chunk of audio ready to be sent upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

/// Mono f32 samples tagged with the rate they should be played at.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encodes captured samples as base64 PCM16 tagged for the 16 kHz upload format.
pub fn encode_for_upload(samples: &[f32]) -> MediaBlob {
    MediaBlob {
        mime_type: UPLOAD_MIME_TYPE.to_string(),
        data: encode_f32(samples),
    }
}

/// Decodes a base64 PCM16 payload received from the model.
pub fn decode_from_wire(
    base64_fragment: &str,
    target_sample_rate: u32,
) -> Result<PcmBuffer, DecodeError> {
    if base64_fragment.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    decode_pcm16(&bytes, target_sample_rate)
}

/// Interprets raw bytes as little-endian PCM16 and normalises them to [-1, 1].
pub fn decode_pcm16(bytes: &[u8], target_sample_rate: u32) -> Result<PcmBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect();
    Ok(PcmBuffer::new(samples, target_sample_rate))
}

/// Encodes a slice of f32 samples into a base64 string of PCM16 bytes.
pub fn encode_f32(pcm32: &[f32]) -> String {
    let pcm16: Vec<u8> = pcm32.to_binary();
    base64::engine::general_purpose::STANDARD.encode(&pcm16)
}

/// A trait for converting audio sample types to a binary representation (Vec<u8>).
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [f32] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| {
                let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect()
    }
}

/// Root-mean-square amplitude of a block. Empty blocks are silent.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Maps a block to the [0, 1] level shown by the visualizer.
pub fn display_level(samples: &[f32]) -> f32 {
    (rms(samples) * VOLUME_GAIN).min(1.0)
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits a slice of audio samples into a vector of vectors, where each inner vector has a fixed chunk size.
/// If a chunk is smaller than the `chunk_size`, it is padded with zeros.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Resamples a whole buffer in one go, trimming the zero padding of the last chunk.
pub fn resample_all(samples: &[f32], from_rate: u32, to_rate: u32) -> anyhow::Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(from_rate as f64, to_rate as f64, RESAMPLER_CHUNK_SIZE)?;
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLER_CHUNK_SIZE);
    for chunk in split_for_chunks(samples, RESAMPLER_CHUNK_SIZE) {
        let resampled = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = resampled.first() {
            out.extend_from_slice(channel);
        }
    }
    out.truncate(expected);
    Ok(out)
}

/// Converts one continuous output stream between rates, pulling source frames on demand.
///
/// The resampler lives as long as the stream, so consecutive segments share
/// its history and no seam is introduced where one ends and the next begins.
pub struct StreamResampler {
    resampler: Option<FastFixedIn<f32>>,
    ready: VecDeque<f32>,
    chunk: Vec<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, device_rate: u32) -> anyhow::Result<Self> {
        let resampler = if source_rate == device_rate {
            None
        } else {
            Some(create_resampler(
                source_rate as f64,
                device_rate as f64,
                RESAMPLER_CHUNK_SIZE,
            )?)
        };
        Ok(Self {
            resampler,
            ready: VecDeque::with_capacity(RESAMPLER_CHUNK_SIZE * 4),
            chunk: Vec::with_capacity(RESAMPLER_CHUNK_SIZE * 2),
        })
    }

    /// Fills `out` at the device rate. `source` renders the next source-rate frames
    /// into the slice it is given whenever more input is needed.
    pub fn fill(&mut self, out: &mut [f32], mut source: impl FnMut(&mut [f32])) {
        while self.ready.len() < out.len() {
            let needed = match self.resampler.as_ref() {
                Some(resampler) => resampler.input_frames_next(),
                None => out.len() - self.ready.len(),
            };
            self.chunk.resize(needed, 0.0);
            source(&mut self.chunk);
            match self.resampler.as_mut() {
                None => self.ready.extend(self.chunk.iter().copied()),
                Some(resampler) => match resampler.process(&[self.chunk.as_slice()], None) {
                    Ok(resampled) => {
                        if let Some(channel) = resampled.first() {
                            self.ready.extend(channel.iter().copied());
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Playing silence, output resample failed: {}", e);
                        let missing = out.len() - self.ready.len();
                        self.ready.extend(std::iter::repeat_n(0.0, missing));
                    }
                },
            }
        }
        let n = out.len();
        for (slot, sample) in out.iter_mut().zip(self.ready.drain(..n)) {
            *slot = sample;
        }
    }

    /// Forgets buffered output and filter history, e.g. after playback was cut off.
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.ready.clear();
    }
}

/// Turns device-rate mono audio into fixed-size blocks at the upload rate.
///
/// Holds at most one resampler chunk and one partial block, so memory stays
/// bounded no matter how long capture runs.
pub struct BlockAssembler {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    block: Vec<f32>,
    block_size: usize,
}

impl BlockAssembler {
    pub fn new(device_rate: u32, target_rate: u32, block_size: usize) -> anyhow::Result<Self> {
        let resampler = if device_rate == target_rate {
            None
        } else {
            Some(create_resampler(
                device_rate as f64,
                target_rate as f64,
                RESAMPLER_CHUNK_SIZE,
            )?)
        };
        Ok(Self {
            resampler,
            pending: Vec::with_capacity(RESAMPLER_CHUNK_SIZE * 2),
            block: Vec::with_capacity(block_size * 2),
            block_size,
        })
    }

    /// Feeds captured samples and returns every block completed by them, in order.
    pub fn push(&mut self, mono: &[f32]) -> Vec<Vec<f32>> {
        match self.resampler.as_mut() {
            None => self.block.extend_from_slice(mono),
            Some(resampler) => {
                self.pending.extend_from_slice(mono);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = self.pending.drain(..needed).collect();
                    match resampler.process(&[chunk.as_slice()], None) {
                        Ok(resampled) => {
                            if let Some(channel) = resampled.first() {
                                self.block.extend_from_slice(channel);
                            }
                        }
                        Err(e) => tracing::warn!("Dropping capture chunk, resample failed: {}", e),
                    }
                }
            }
        }

        let mut blocks = Vec::new();
        while self.block.len() >= self.block_size {
            let rest = self.block.split_off(self.block_size);
            blocks.push(std::mem::replace(&mut self.block, rest));
        }
        blocks
    }
}
