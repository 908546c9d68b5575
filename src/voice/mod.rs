//! Voice I/O module
//!
//! Handles microphone capture and response playback.
//! Transcription and synthesis happen on the agent backend.

mod capture;
mod playback;

pub use capture::{
    AudioTrack, CaptureController, CaptureHandle, CpalMicrophone, Microphone, RecordingPayload,
    SAMPLE_RATE, WAV_MEDIA_TYPE, samples_to_wav, select_input_config,
};
pub use playback::{
    AudioPlayback, DecodedAudio, HttpAudioPlayer, PlaybackDone, Player, decode_audio,
};
