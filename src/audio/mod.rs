//! audio - Audio capture, playback, and PCM codec library
//!
//! Uses ALSA for audio I/O. Capture delivers 16 kHz mono float frames;
//! playback mixes 24 kHz mono buffers on a software mixing destination.

mod alsa_device;
pub mod device;
pub mod pcm;
pub mod play;
pub mod record;
pub mod stream_decoder;

pub use device::{AudioInput, CaptureConstraints, FrameSink, InputHandle, PlaybackOutput};
pub use pcm::{AudioFrame, DecodedBuffer, EncodedChunk, InboundAudio};
pub use play::{AlsaOutput, PlaybackConfig};
pub use record::AlsaInput;
pub use stream_decoder::{ChunkDecoder, DecodeQueue, PcmDecoder};
