//! Audio capture and post-processing
//!
//! The capture backend trait, the CPAL implementation, the gain processor
//! applied to every new chunk, and the encoder that produces the upload blob.

pub mod backend;
pub mod encoder;
pub mod gain;
mod gap_fill;
pub mod recorder;

pub use backend::{
    AudioFormat, AudioQuality, CaptureBackend, CaptureSettings, FaultSender, RecordingResult,
};
pub use gain::{apply_gain, Gain};
pub use recorder::CpalBackend;
