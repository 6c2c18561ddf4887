//! voice_link_rs - realtime bidirectional voice session client.
//!
//! Microphone audio is captured, encoded as 16 kHz PCM16 and streamed to a
//! live model session over WebSocket; 24 kHz PCM replies are decoded and
//! scheduled back to back on the speaker, with barge-in support.

pub mod audio;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod interruption;
pub mod net_link;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod status_bridge;
pub mod transport;

#[cfg(test)]
mod testing;
