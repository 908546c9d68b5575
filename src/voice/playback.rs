//! Response audio playback
//!
//! The controller only sets a playback source and asks the [`Player`] to
//! start. Completion comes back through [`PlaybackDone`], which feeds the
//! auto-record scheduler.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::turn::Event;
use crate::{Error, Result};

/// Reports that the response audio finished playing
#[derive(Debug, Clone)]
pub struct PlaybackDone {
    events: mpsc::UnboundedSender<Event>,
}

impl PlaybackDone {
    pub(crate) const fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self { events }
    }

    /// Signal the end of playback
    pub fn notify(self) {
        if self.events.send(Event::PlaybackEnded).is_err() {
            tracing::debug!("client loop closed, playback end dropped");
        }
    }
}

/// Plays synthesized response audio
#[async_trait]
pub trait Player: Send + Sync {
    /// Start playing `source`, calling [`PlaybackDone::notify`] when it ends
    ///
    /// Returns once playback has started. The controller runs this on its
    /// own task, so it may wait on the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PlaybackBlocked`] when the host refuses to start
    /// without a user gesture, or another error if the audio can't be played
    async fn play(&self, source: &str, done: PlaybackDone) -> Result<()>;
}

/// Fetches response audio over HTTP and plays it on the default output device
pub struct HttpAudioPlayer {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAudioPlayer {
    /// Create a player resolving relative sources against `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Resolve a playback source to an absolute URL
    ///
    /// # Errors
    ///
    /// Returns error if `source` is not a valid URL reference
    pub fn resolve(&self, source: &str) -> Result<Url> {
        Ok(self.base_url.join(source)?)
    }
}

#[async_trait]
impl Player for HttpAudioPlayer {
    async fn play(&self, source: &str, done: PlaybackDone) -> Result<()> {
        let url = self.resolve(source)?;
        tracing::debug!(url = %url, "fetching response audio");

        let audio = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let (started_tx, started_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let opened = decode_audio(&audio).and_then(|decoded| {
                AudioPlayback::new(decoded.sample_rate).map(|playback| (playback, decoded))
            });
            let (playback, decoded) = match opened {
                Ok(opened) => {
                    let _ = started_tx.send(Ok(()));
                    opened
                }
                Err(e) => {
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = playback.play_blocking(&decoded.samples) {
                tracing::warn!(error = %e, "playback failed");
            }
            done.notify();
        });

        started_rx
            .await
            .map_err(|_| Error::Playback("playback thread exited".to_string()))?
    }
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Playback(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Play mono samples, blocking until they finish
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails
    pub fn play_blocking(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let samples: Arc<[f32]> = Arc::from(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let finished = Arc::clone(&finished);
            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.load(Ordering::Relaxed);
                            let sample = if let Some(&s) = samples.get(pos) {
                                position.store(pos + 1, Ordering::Relaxed);
                                s
                            } else {
                                finished.store(true, Ordering::Release);
                                0.0
                            };
                            frame.fill(sample);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Playback(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let sample_count = samples.len() as u64;
        let duration_ms = sample_count * 1000 / u64::from(self.config.sample_rate.0);
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Acquire) {
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

/// Mono samples decoded from a response audio file
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

/// Decode WAV or MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor MP3
pub fn decode_audio(data: &[u8]) -> Result<DecodedAudio> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Playback(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Playback(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            #[allow(clippy::cast_precision_loss)]
            let normalized: Vec<f32> = reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Playback(e.to_string()))?;
            normalized
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                }

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
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Playback("no MP3 frames found".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
