//! Audio output to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::voice::Volume;
use crate::{Error, Result};

/// Output that plays encoded audio
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Play encoded audio (MP3 or WAV), returning once it has finished or was stopped
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be decoded or the device fails
    async fn play(&self, audio: &[u8], volume: Volume) -> Result<()>;

    /// Stop whatever is playing; a no-op when silent
    fn stop(&self);
}

/// Decoded mono PCM
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Pcm {
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / u64::from(self.sample_rate))
    }
}

/// Plays audio on the default output device
pub struct SpeakerDevice {
    /// Bumped by `stop`; a playback ends once it sees a newer generation
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for SpeakerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerDevice").finish_non_exhaustive()
    }
}

impl SpeakerDevice {
    /// Create a playback device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self {
            generation: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl PlaybackDevice for SpeakerDevice {
    async fn play(&self, audio: &[u8], volume: Volume) -> Result<()> {
        let pcm = decode(audio)?;
        let generation = Arc::clone(&self.generation);
        let started_at = generation.load(Ordering::SeqCst);

        tokio::task::spawn_blocking(move || play_blocking(pcm, volume, generation, started_at))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stand-in for a host without an audio output device
///
/// Every `play` fails, so the gateway falls through to the local engine,
/// which drives its own audio output.
#[derive(Debug, Clone)]
pub struct UnavailableDevice {
    reason: String,
}

impl UnavailableDevice {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PlaybackDevice for UnavailableDevice {
    async fn play(&self, _audio: &[u8], _volume: Volume) -> Result<()> {
        Err(Error::Audio(format!("no audio output: {}", self.reason)))
    }

    fn stop(&self) {}
}

/// How often the playback thread checks for completion or `stop`
const STOP_POLL: Duration = Duration::from_millis(5);

/// Find an output config for the given rate, preferring mono
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| supports(c, 2))
        })
        .ok_or_else(|| {
            Error::Audio(format!("no output config supports {sample_rate} Hz"))
        })?;

    Ok(supported.with_sample_rate(rate).config())
}

/// Play samples, blocking until done or stopped
fn play_blocking(
    pcm: Pcm,
    volume: Volume,
    generation: Arc<AtomicU64>,
    started_at: u64,
) -> Result<()> {
    if pcm.samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = output_config(&device, pcm.sample_rate)?;
    let channels = config.channels as usize;
    let gain = volume.get();

    let timeout = pcm.duration() + Duration::from_millis(500);
    let samples: Arc<Vec<f32>> = Arc::new(pcm.samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let samples_cb = Arc::clone(&samples);
    let position_cb = Arc::clone(&position);
    let finished_cb = Arc::clone(&finished);
    let generation_cb = Arc::clone(&generation);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let stopped = generation_cb.load(Ordering::SeqCst) != started_at;
                let (pos, done) = fill_buffer(
                    data,
                    channels,
                    &samples_cb,
                    position_cb.load(Ordering::Relaxed),
                    gain,
                    stopped,
                );
                position_cb.store(pos, Ordering::Relaxed);
                if done {
                    finished_cb.store(true, Ordering::Relaxed);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Poll for completion with timeout
    let start = Instant::now();

    while !finished.load(Ordering::Relaxed) {
        if generation.load(Ordering::SeqCst) != started_at {
            break;
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(STOP_POLL);
    }

    drop(stream);
    let stopped = generation.load(Ordering::SeqCst) != started_at;
    tracing::debug!(
        samples = samples.len(),
        played = position.load(Ordering::Relaxed),
        stopped,
        "playback complete"
    );

    Ok(())
}

/// Fill one interleaved output buffer from mono `samples` starting at `pos`
///
/// Returns the new position and whether playback is over. Once `stopped`,
/// the buffer is pure silence so a stopped stream is inaudible from its
/// next callback on.
fn fill_buffer(
    data: &mut [f32],
    channels: usize,
    samples: &[f32],
    mut pos: usize,
    gain: f32,
    stopped: bool,
) -> (usize, bool) {
    if stopped {
        data.fill(0.0);
        return (pos, true);
    }

    let mut done = false;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = samples.get(pos).map_or_else(
            || {
                done = true;
                0.0
            },
            |s| {
                pos += 1;
                s * gain
            },
        );
        frame.fill(sample);
    }
    (pos, done)
}

/// Decode MP3 or WAV bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the bytes are not decodable audio
pub fn decode(audio: &[u8]) -> Result<Pcm> {
    if audio.starts_with(b"RIFF") {
        decode_wav(audio)
    } else {
        decode_mp3(audio)
    }
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no MP3 frames found".to_string()));
    }

    Ok(Pcm {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to f32 samples
#[allow(clippy::cast_precision_loss)]
fn decode_wav(wav_data: &[u8]) -> Result<Pcm> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(Pcm {
        samples,
        sample_rate: spec.sample_rate,
    })
}
