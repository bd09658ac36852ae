//! Chunked messaging over a data channel.
//!
//! Data channels have a practical frame-size limit. [`ChunkedChannel`] sends
//! small frames as-is and larger ones as a sequence of chunk envelopes,
//! pausing while the channel's send buffer is above the high-water mark.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::{chunk_frame, ChunkReassembler};
use crate::error::{Result, SyncError};
use crate::messages::{limits, AppMessage};
use crate::transport::{ChannelState, DataChannel};

/// Configuration for chunking and backpressure.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Frames above this many bytes are chunked.
    pub chunk_size: usize,
    /// Pause sending while more than this many bytes are buffered.
    pub high_water_mark: usize,
    /// How often to re-check the buffer while paused.
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            chunk_size: limits::CHUNK_SIZE,
            high_water_mark: limits::HIGH_WATER_MARK,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Message-level wrapper around one data channel.
pub struct ChunkedChannel {
    channel: Arc<dyn DataChannel>,
    config: ChannelConfig,
    /// Frames issued while the channel was still connecting.
    queue: VecDeque<String>,
    reassembler: ChunkReassembler,
    closed: bool,
}

impl ChunkedChannel {
    pub fn new(channel: Arc<dyn DataChannel>, config: ChannelConfig) -> Self {
        Self {
            channel,
            config,
            queue: VecDeque::new(),
            reassembler: ChunkReassembler::new(),
            closed: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        if self.closed {
            ChannelState::Closed
        } else {
            self.channel.ready_state()
        }
    }

    /// Frames waiting for the channel to open.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Serialize and send a message.
    pub async fn send(&mut self, message: &AppMessage) -> Result<()> {
        tracing::debug!(message = message.name(), "sending");
        self.send_frame(message.encode()?).await
    }

    /// Send an already-serialized frame.
    ///
    /// Queued while the channel is connecting, rejected once it is closing
    /// or closed. Frames still queued when the channel opens go out first.
    pub async fn send_frame(&mut self, frame: String) -> Result<()> {
        match self.state() {
            ChannelState::Connecting => {
                self.queue.push_back(frame);
                tracing::debug!(
                    queued = self.queue.len(),
                    "channel connecting, frame queued"
                );
                Ok(())
            }
            ChannelState::Open => {
                self.flush_pending().await?;
                self.transmit(&frame).await
            }
            ChannelState::Closing | ChannelState::Closed => Err(SyncError::ChannelClosed),
        }
    }

    /// Send every queued frame in order. Call when the channel opens.
    ///
    /// Returns how many frames were flushed. The queue is drained, so a
    /// second call sends nothing.
    pub async fn flush_pending(&mut self) -> Result<usize> {
        let mut flushed = 0;
        while let Some(frame) = self.queue.pop_front() {
            self.transmit(&frame).await?;
            flushed += 1;
        }
        if flushed > 0 {
            tracing::debug!(flushed, "flushed queued frames");
        }
        Ok(flushed)
    }

    async fn transmit(&self, frame: &str) -> Result<()> {
        if frame.len() <= self.config.chunk_size {
            return self.channel.send(frame);
        }

        let envelopes = chunk_frame(frame, self.config.chunk_size);
        tracing::debug!(
            bytes = frame.len(),
            chunks = envelopes.len(),
            "sending chunked frame"
        );
        for envelope in envelopes {
            self.wait_for_drain().await?;
            let chunk = AppMessage::Chunk(envelope).encode()?;
            self.channel.send(&chunk)?;
        }
        Ok(())
    }

    async fn wait_for_drain(&self) -> Result<()> {
        loop {
            if self.state() != ChannelState::Open {
                return Err(SyncError::ChannelClosed);
            }
            if self.channel.buffered_amount() <= self.config.high_water_mark {
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Handle one incoming frame.
    ///
    /// Returns the decoded message, or `None` while a chunked message is
    /// still incomplete.
    pub fn on_receive(&mut self, frame: &str) -> Result<Option<AppMessage>> {
        match AppMessage::decode(frame)? {
            AppMessage::Chunk(envelope) => match self.reassembler.accept(envelope)? {
                Some(joined) => match AppMessage::decode(&joined)? {
                    AppMessage::Chunk(_) => Err(SyncError::InvalidMessage(
                        "chunk envelope nested in a chunked frame".into(),
                    )),
                    message => Ok(Some(message)),
                },
                None => Ok(None),
            },
            message => Ok(Some(message)),
        }
    }

    /// Close the channel and drop queued and partial frames.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.queue.clear();
        self.reassembler.clear();
        self.channel.close();
    }
}
