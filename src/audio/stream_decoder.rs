//! Inbound chunk decoding.
//!
//! Decoding is the one step of the inbound path that may suspend, so it runs
//! on its own task. Jobs are processed strictly in submission order and every
//! result is posted back stamped with the playback generation it was
//! submitted under.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::pcm::{DecodedBuffer, InboundAudio, decode_base64, decode_pcm16, parse_pcm_mime_type};
use crate::error::{LinkError, Result};
use crate::events::{EventSender, LinkEvent};

/// Converts one inbound chunk into playback-ready samples.
#[async_trait]
pub trait ChunkDecoder: Send + Sync {
    async fn decode(&self, chunk: &InboundAudio) -> Result<DecodedBuffer>;
}

/// Base64 PCM16 mono decoder for a fixed sample rate.
#[derive(Debug, Clone)]
pub struct PcmDecoder {
    sample_rate: u32,
}

impl PcmDecoder {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn decode_sync(&self, chunk: &InboundAudio) -> Result<DecodedBuffer> {
        if let Some(rate) = parse_pcm_mime_type(&chunk.mime_type)? {
            if rate != self.sample_rate {
                return Err(LinkError::Decode(format!(
                    "unsupported inbound rate {} Hz, expected {} Hz",
                    rate, self.sample_rate
                )));
            }
        }
        let bytes = decode_base64(&chunk.data)?;
        let samples = decode_pcm16(&bytes)?;
        Ok(DecodedBuffer::new(samples, self.sample_rate))
    }
}

#[async_trait]
impl ChunkDecoder for PcmDecoder {
    async fn decode(&self, chunk: &InboundAudio) -> Result<DecodedBuffer> {
        self.decode_sync(chunk)
    }
}

struct DecodeJob {
    generation: u64,
    chunk: InboundAudio,
}

/// Ordered decode worker feeding [`LinkEvent::Decoded`] back into the loop.
pub struct DecodeQueue {
    tx: mpsc::UnboundedSender<DecodeJob>,
    worker: JoinHandle<()>,
}

impl DecodeQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(decoder: Box<dyn ChunkDecoder>, events: EventSender) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DecodeJob>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = decoder.decode(&job.chunk).await;
                let event = LinkEvent::Decoded {
                    generation: job.generation,
                    result,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            log::debug!("Decode worker stopped");
        });
        Self { tx, worker }
    }

    pub fn submit(&self, generation: u64, chunk: InboundAudio) -> Result<()> {
        self.tx
            .send(DecodeJob { generation, chunk })
            .map_err(|_| LinkError::Decode("decode worker has stopped".into()))
    }
}

impl Drop for DecodeQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
