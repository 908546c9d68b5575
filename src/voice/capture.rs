//! Microphone capture lifecycle
//!
//! [`CaptureController`] owns at most one active capture. Starting acquires
//! the input device exclusively; stopping finalizes the buffered fragments
//! into a [`RecordingPayload`] and always releases the device.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Media type of payloads produced by [`CpalMicrophone`]
pub const WAV_MEDIA_TYPE: &str = "audio/wav";

/// A source of encoded microphone audio
///
/// Implementations map to the host's capture API (cpal natively,
/// `MediaRecorder` in a browser).
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire the input device and begin recording
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] when permission is denied or no device exists
    async fn open(&self) -> Result<Box<dyn AudioTrack>>;
}

/// A live recording on an acquired input device
pub trait AudioTrack: Send {
    /// Media type of the fragments this track produces
    fn media_type(&self) -> &'static str;

    /// Stop recording and release the device
    ///
    /// Returns the encoded fragments in capture order. The device must be
    /// released even when this returns an error.
    ///
    /// # Errors
    ///
    /// Returns error if the buffered audio cannot be encoded
    fn stop(&mut self) -> Result<Vec<Vec<u8>>>;
}

/// Identifies one capture window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(u64);

/// Finalized audio of one capture window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingPayload {
    bytes: Vec<u8>,
    media_type: &'static str,
}

impl RecordingPayload {
    /// Join ordered fragments into a single payload
    #[must_use]
    pub fn from_fragments(fragments: Vec<Vec<u8>>, media_type: &'static str) -> Self {
        Self {
            bytes: fragments.concat(),
            media_type,
        }
    }

    /// Media type of the encoded audio
    #[must_use]
    pub const fn media_type(&self) -> &'static str {
        self.media_type
    }

    /// Upload filename, with an extension derived from the media type
    #[must_use]
    pub fn file_name(&self) -> String {
        let subtype = self
            .media_type
            .split(';')
            .next()
            .and_then(|essence| essence.split('/').nth(1))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("bin");
        let ext = match subtype {
            "mpeg" => "mp3",
            "x-wav" | "wave" => "wav",
            other => other,
        };
        format!("chat.{ext}")
    }

    /// Encoded bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Take ownership of the encoded bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// An acquired input device
struct ActiveCapture {
    handle: CaptureHandle,
    track: Box<dyn AudioTrack>,
    released: bool,
}

impl ActiveCapture {
    fn release(&mut self) -> Result<Vec<Vec<u8>>> {
        if self.released {
            return Ok(Vec::new());
        }
        self.released = true;
        self.track.stop()
    }
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.track.stop() {
                tracing::warn!(error = %e, "error releasing input device");
            }
            tracing::debug!(handle = self.handle.0, "input device released on drop");
        }
    }
}

/// Wraps the microphone capture lifecycle
pub struct CaptureController {
    microphone: Arc<dyn Microphone>,
    active: Option<ActiveCapture>,
    next_handle: u64,
}

impl CaptureController {
    /// Create a controller over the given microphone
    #[must_use]
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            active: None,
            next_handle: 1,
        }
    }

    /// Acquire the device and begin a capture window
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if the device cannot be acquired,
    /// or [`Error::Audio`] if a capture is already running
    pub async fn start(&mut self) -> Result<CaptureHandle> {
        if let Some(active) = &self.active {
            return Err(Error::Audio(format!(
                "capture {} already active",
                active.handle.0
            )));
        }

        let track = self.microphone.open().await?;
        let handle = CaptureHandle(self.next_handle);
        self.next_handle += 1;

        tracing::debug!(handle = handle.0, media_type = track.media_type(), "capture started");
        self.active = Some(ActiveCapture {
            handle,
            track,
            released: false,
        });

        Ok(handle)
    }

    /// Finalize the capture identified by `handle`
    ///
    /// Returns `Ok(None)` when `handle` is not the active capture (already
    /// finalized or superseded). The device is released before any error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the track fails to produce its final fragments
    pub fn stop(&mut self, handle: CaptureHandle) -> Result<Option<RecordingPayload>> {
        if self.active.as_ref().is_none_or(|a| a.handle != handle) {
            tracing::debug!(handle = handle.0, "stop for inactive capture ignored");
            return Ok(None);
        }

        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };
        let media_type = active.track.media_type();
        let fragments = active.release()?;

        let payload = RecordingPayload::from_fragments(fragments, media_type);
        tracing::debug!(
            handle = handle.0,
            bytes = payload.len(),
            "capture finalized"
        );
        Ok(Some(payload))
    }

    /// Release the device and discard anything captured
    pub fn abort(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.release() {
                tracing::warn!(error = %e, "error releasing input device");
            }
            tracing::debug!(handle = active.handle.0, "capture aborted");
        }
    }

    /// Handle of the running capture, if any
    #[must_use]
    pub fn active_handle(&self) -> Option<CaptureHandle> {
        self.active.as_ref().map(|a| a.handle)
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.active.is_some()
    }
}

/// Captures from the default input device via cpal
///
/// The cpal stream lives on a dedicated thread (streams aren't `Send`);
/// stopping the track joins that thread and encodes the samples as WAV.
#[derive(Debug, Clone, Copy)]
pub struct CpalMicrophone {
    sample_rate: u32,
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
        }
    }
}

impl CpalMicrophone {
    /// Create a microphone capturing at `sample_rate`
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioTrack>> {
        let sample_rate = self.sample_rate;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let worker = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(sample_rate, ready_tx, &stop_rx))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(CpalTrack {
                sample_rate,
                stop_tx: Some(stop_tx),
                worker: Some(worker),
            })),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(Error::DeviceUnavailable(
                "capture thread exited before the device opened".to_string(),
            )),
        }
    }
}

struct CpalTrack {
    sample_rate: u32,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<JoinHandle<Vec<f32>>>,
}

impl AudioTrack for CpalTrack {
    fn media_type(&self) -> &'static str {
        WAV_MEDIA_TYPE
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>> {
        // Dropping the sender wakes the capture thread
        self.stop_tx.take();

        let Some(worker) = self.worker.take() else {
            return Ok(Vec::new());
        };
        let samples = worker
            .join()
            .map_err(|_| Error::Audio("capture thread panicked".to_string()))?;

        if samples.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![samples_to_wav(&samples, self.sample_rate)?])
    }
}

/// Own the cpal stream until the track is stopped
fn capture_thread(
    sample_rate: u32,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: &std::sync::mpsc::Receiver<()>,
) -> Vec<f32> {
    let buffer = Arc::new(Mutex::new(Vec::new()));

    let stream = match open_input_stream(sample_rate, Arc::clone(&buffer)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return Vec::new();
        }
    };
    let _ = ready_tx.send(Ok(()));

    // Returns once the sender is dropped
    while stop_rx.recv().is_ok() {}

    drop(stream);
    tracing::debug!("audio capture stopped");

    buffer
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default()
}

fn open_input_stream(sample_rate: u32, buffer: Arc<Mutex<Vec<f32>>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let configs = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    let config: StreamConfig = select_input_config(configs, sample_rate)?
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

/// Pick a mono input configuration covering `sample_rate`
///
/// # Errors
///
/// Returns [`Error::DeviceUnavailable`] if no configuration matches
pub fn select_input_config(
    mut configs: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Result<SupportedStreamConfigRange> {
    configs
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| {
            Error::DeviceUnavailable(format!("no mono input config at {sample_rate} Hz"))
        })
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
