//! Pairing-and-sync session state machine.
//!
//! One [`SyncSession`] owns everything a pairing interaction needs: the
//! negotiator, the chunked channel once open, the fragment assembler for
//! scanned codes and the exchange state. Dropping or closing the session
//! tears all of it down.
//!
//! ## Message Flow
//!
//! ```text
//! Device A                              Device B
//!   |-------- sync_request ------------->|
//!   |<------- sync_data (B snapshot) ----|
//!   |  merge                             |
//!   |-------- sync_ack (A snapshot) ---->|
//!   |  done                       merge  |
//!   |                             done   |
//! ```
//!
//! Either side may skip the request and open with `sync_data`. An opening
//! message issued while the channel is still connecting waits in the
//! channel's queue and goes out when it opens.

use std::sync::Arc;
use std::time::Duration;

use ktn_core::{
    decode_signaling, encode_for_transfer, fragment, DeviceId, FragmentAssembler,
    FragmentProgress, OutOfBand, Timestamp, DEFAULT_FRAGMENT_SIZE,
};
use ktn_store::EntityStore;

use crate::channel::{ChannelConfig, ChunkedChannel};
use crate::error::{Result, SyncError};
use crate::events::{EventSink, SessionStage, SyncEvent};
use crate::messages::{AppMessage, Snapshot};
use crate::negotiator::{NegotiationConfig, Negotiator, Role};
use crate::reconcile::{gather_snapshot, merge_snapshot, MergeReport};
use crate::transport::{ConnectionState, DirectTransport, PeerEvent};

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub negotiation: NegotiationConfig,
    pub channel: ChannelConfig,
    /// Characters per pairing-code fragment.
    pub fragment_size: usize,
    /// Timeout for waiting for peer messages once the channel is open.
    pub message_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            negotiation: NegotiationConfig::default(),
            channel: ChannelConfig::default(),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            message_timeout: Duration::from_secs(30),
        }
    }
}

/// How this side opens the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStart {
    /// Send `sync_request` and wait for the peer's snapshot.
    Request,
    /// Send our snapshot straight away as `sync_data`.
    Data,
    /// Wait for the peer to open.
    Wait,
}

/// Result of feeding one scanned or pasted code to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// More fragments are needed.
    Partial { received: usize, total: usize },
    /// Responder: the answer to show the other device.
    Reply(OutOfBand),
    /// Initiator: the answer was applied; call `connect`.
    Connecting,
}

/// Exchange progress. In flight in any state other than `Idle` and `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    Idle,
    /// We sent `sync_request`.
    AwaitingData,
    /// We sent `sync_data`.
    AwaitingAck,
    Done,
}

/// One pairing interaction, from the first code to the merged result.
pub struct SyncSession<S: EntityStore + ?Sized> {
    store: Arc<S>,
    device_id: DeviceId,
    config: SyncConfig,
    stage: SessionStage,
    negotiator: Negotiator,
    channel: Option<ChunkedChannel>,
    assembler: FragmentAssembler,
    exchange: Exchange,
    report: MergeReport,
    events: EventSink,
    /// The opening message has been issued.
    started: bool,
    closed: bool,
}

impl<S: EntityStore + ?Sized> SyncSession<S> {
    /// Create a session and its underlying connection.
    pub async fn new<T>(
        role: Role,
        store: Arc<S>,
        transport: &T,
        device_id: DeviceId,
        config: SyncConfig,
        events: EventSink,
    ) -> Result<Self>
    where
        T: DirectTransport + ?Sized,
    {
        let negotiator = Negotiator::new(role, transport, config.negotiation.clone()).await?;
        tracing::debug!(?role, device = %device_id, "session created");
        Ok(Self {
            store,
            device_id,
            config,
            stage: SessionStage::Idle,
            negotiator,
            channel: None,
            assembler: FragmentAssembler::new(),
            exchange: Exchange::Idle,
            report: MergeReport::default(),
            events,
            started: false,
            closed: false,
        })
    }

    pub fn role(&self) -> Role {
        self.negotiator.role()
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    /// Everything merged so far.
    pub fn report(&self) -> &MergeReport {
        &self.report
    }

    /// Frames waiting for the channel to open.
    pub fn pending(&self) -> usize {
        self.channel.as_ref().map_or(0, ChunkedChannel::pending)
    }

    fn set_stage(&mut self, stage: SessionStage) {
        if self.stage != stage {
            tracing::info!(from = %self.stage, to = %stage, "session stage");
            self.stage = stage;
            self.events.emit(SyncEvent::StageChanged(stage));
        }
    }

    /// Report an error. Terminal errors end the session.
    fn settle(&mut self, err: SyncError) -> SyncError {
        self.events.emit(SyncEvent::error(&err));
        if err.is_terminal() {
            tracing::error!(error = %err, stage = %self.stage, "session failed");
            self.set_stage(SessionStage::Failed);
            self.teardown();
        } else {
            tracing::warn!(error = %err, "step rejected");
        }
        err
    }

    fn ensure_live(&self) -> Result<()> {
        if self.closed || self.stage.is_terminal() {
            return Err(SyncError::ChannelClosed);
        }
        Ok(())
    }

    /// Initiator: produce the offer, compacted and cut into fragments.
    pub async fn create_offer(&mut self) -> Result<OutOfBand> {
        self.ensure_live()?;
        self.set_stage(SessionStage::Negotiating);
        let offer = match self.negotiator.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.settle(e)),
        };
        encode_for_transfer(&offer, self.config.fragment_size).map_err(|e| self.settle(e.into()))
    }

    /// Feed one scanned fragment or pasted payload.
    ///
    /// Text without the fragment prefix is taken as a whole payload. Once a
    /// payload is complete it is applied according to the role.
    pub async fn receive_code(&mut self, raw: &str) -> Result<ScanOutcome> {
        self.ensure_live()?;
        let raw = raw.trim();

        let text = match fragment::parse(raw) {
            Some(fragment) => match self.assembler.accept(fragment) {
                Ok(FragmentProgress::Partial { received, total }) => {
                    self.events
                        .emit(SyncEvent::FragmentReceived { received, total });
                    return Ok(ScanOutcome::Partial { received, total });
                }
                Ok(FragmentProgress::Complete(text)) => {
                    let total = self.assembler.total().unwrap_or(1);
                    self.events.emit(SyncEvent::FragmentReceived {
                        received: total,
                        total,
                    });
                    self.assembler.reset();
                    text
                }
                Err(e) => return Err(self.settle(e.into())),
            },
            None => raw.to_string(),
        };

        let payload = decode_signaling(&text).map_err(|e| self.settle(e.into()))?;

        match self.negotiator.role() {
            Role::Responder => {
                self.set_stage(SessionStage::Negotiating);
                let answer = match self.negotiator.accept_offer(payload).await {
                    Ok(answer) => answer,
                    Err(e) => return Err(self.settle(e)),
                };
                let transfer = encode_for_transfer(&answer, self.config.fragment_size)
                    .map_err(|e| self.settle(e.into()))?;
                self.set_stage(SessionStage::Connecting);
                Ok(ScanOutcome::Reply(transfer))
            }
            Role::Initiator => {
                if let Err(e) = self.negotiator.apply_answer(payload).await {
                    return Err(self.settle(e));
                }
                self.attach_channel();
                self.set_stage(SessionStage::Connecting);
                Ok(ScanOutcome::Connecting)
            }
        }
    }

    /// Wait for the data channel, then flush anything queued on it.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.set_stage(SessionStage::Connecting);
        let opened = match self.negotiator.wait_open().await {
            Ok(channel) => channel,
            Err(e) => return Err(self.settle(e)),
        };

        let config = self.config.channel.clone();
        let chunked = self
            .channel
            .get_or_insert_with(|| ChunkedChannel::new(opened, config));
        let flushed = chunked.flush_pending().await;
        if let Err(e) = flushed {
            return Err(self.settle(e));
        }
        self.set_stage(SessionStage::Open);
        Ok(())
    }

    /// Wrap the negotiator's data channel once one exists. The initiator has
    /// it from the start; the responder learns it when the peer announces it.
    fn attach_channel(&mut self) {
        if self.channel.is_some() {
            return;
        }
        if let Some(channel) = self.negotiator.channel() {
            self.channel = Some(ChunkedChannel::new(channel, self.config.channel.clone()));
        }
    }

    /// Issue the opening message without waiting for the peer.
    ///
    /// Allowed once the codes are exchanged. While the channel is still
    /// connecting the message is queued; a responder that has not yet seen
    /// the channel waits for it first.
    pub async fn begin(&mut self, start: SyncStart) -> Result<()> {
        self.ensure_live()?;
        match self.stage {
            SessionStage::Connecting | SessionStage::Open => {}
            stage => {
                return Err(self.settle(SyncError::InvalidSignaling(format!(
                    "cannot start a sync while {stage}"
                ))))
            }
        }
        if self.started {
            return Ok(());
        }
        self.attach_channel();
        if self.channel.is_none() {
            self.connect().await?;
        }
        if let Err(e) = self.open_exchange(start).await {
            return Err(self.settle(e));
        }
        self.started = true;
        Ok(())
    }

    /// Run the snapshot exchange to completion.
    ///
    /// `start` is ignored if [`begin`](Self::begin) already issued the
    /// opening message.
    pub async fn sync(&mut self, start: SyncStart) -> Result<MergeReport> {
        self.begin(start).await?;
        if self.stage == SessionStage::Connecting {
            self.connect().await?;
        }
        self.set_stage(SessionStage::Syncing);

        match self.run_exchange().await {
            Ok(()) => {
                self.set_stage(SessionStage::Done);
                self.events.emit(SyncEvent::Merged(self.report.clone()));
                Ok(self.report.clone())
            }
            Err(e) => Err(self.settle(e)),
        }
    }

    async fn open_exchange(&mut self, start: SyncStart) -> Result<()> {
        match start {
            SyncStart::Request => {
                let request = AppMessage::SyncRequest {
                    device_id: self.device_id,
                    timestamp: Timestamp::now(),
                };
                self.send(&request).await?;
                self.exchange = Exchange::AwaitingData;
            }
            SyncStart::Data => {
                let snapshot = gather_snapshot(self.store.as_ref()).await?;
                self.send(&AppMessage::SyncData(snapshot)).await?;
                self.exchange = Exchange::AwaitingAck;
            }
            SyncStart::Wait => {}
        }
        Ok(())
    }

    async fn run_exchange(&mut self) -> Result<()> {
        let timeout = self.config.message_timeout;
        while self.exchange != Exchange::Done {
            let event = match tokio::time::timeout(timeout, self.negotiator.next_event()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(SyncError::ChannelClosed),
                Err(_) => return Err(SyncError::ConnectionTimeout(timeout)),
            };

            match event {
                PeerEvent::ChannelMessage(frame) => {
                    let message = match self.channel_mut()?.on_receive(&frame) {
                        Ok(Some(message)) => message,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping frame");
                            continue;
                        }
                    };
                    self.handle(message).await?;
                }
                PeerEvent::ChannelOpen => {
                    self.channel_mut()?.flush_pending().await?;
                }
                PeerEvent::ChannelClosed
                | PeerEvent::ConnectionState(ConnectionState::Closed) => {
                    return Err(SyncError::ChannelClosed)
                }
                PeerEvent::ConnectionState(ConnectionState::Failed) => {
                    return Err(SyncError::ConnectionFailed(
                        "transport reported failure during sync".into(),
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn handle(&mut self, message: AppMessage) -> Result<()> {
        tracing::debug!(message = message.name(), exchange = ?self.exchange, "received");
        match message {
            AppMessage::SyncRequest { device_id, .. } => {
                let crossing = self.exchange == Exchange::AwaitingData
                    && self.device_id.as_bytes() < device_id.as_bytes();
                if self.exchange == Exchange::Idle || crossing {
                    let snapshot = self.snapshot().await?;
                    self.send(&AppMessage::SyncData(snapshot)).await?;
                    self.exchange = Exchange::AwaitingAck;
                } else {
                    tracing::warn!(
                        peer = %device_id,
                        "sync_request while an exchange is outstanding, ignored"
                    );
                }
            }
            AppMessage::SyncData(remote) => {
                self.merge(&remote).await;
                let snapshot = self.snapshot().await?;
                self.send(&AppMessage::SyncAck(snapshot)).await?;
                // Crossing sync_data: our own still needs its ack.
                if self.exchange != Exchange::AwaitingAck {
                    self.exchange = Exchange::Done;
                }
            }
            AppMessage::SyncAck(remote) => {
                if self.exchange == Exchange::AwaitingAck {
                    self.merge(&remote).await;
                    self.exchange = Exchange::Done;
                } else {
                    tracing::warn!("unexpected sync_ack, ignored");
                }
            }
            AppMessage::Chunk(_) => {
                tracing::warn!("stray chunk envelope, ignored");
            }
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        gather_snapshot(self.store.as_ref()).await
    }

    async fn merge(&mut self, remote: &Snapshot) {
        let report = merge_snapshot(self.store.as_ref(), remote).await;
        self.report.absorb(report);
    }

    async fn send(&mut self, message: &AppMessage) -> Result<()> {
        self.channel_mut()?.send(message).await
    }

    fn channel_mut(&mut self) -> Result<&mut ChunkedChannel> {
        self.channel.as_mut().ok_or(SyncError::ChannelClosed)
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        self.negotiator.close();
        self.assembler.reset();
        tracing::debug!(stage = %self.stage, "session torn down");
    }

    /// Close the channel and connection and discard buffered state.
    /// Idempotent.
    pub fn close(&mut self) {
        self.teardown();
    }
}

impl<S: EntityStore + ?Sized> Drop for SyncSession<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
