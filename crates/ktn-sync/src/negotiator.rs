//! Offer/answer negotiation over a direct transport.
//!
//! ```text
//! Initiator: Idle -> GatheringOffer -> OfferReady -> Connecting -> Open
//! Responder: Idle -> GatheringAnswer -> AnswerReady -> Open
//! ```
//!
//! Candidate gathering is bounded by `gather_timeout`; whatever candidates
//! arrived by then go into the description. Waiting for the channel to open
//! is bounded by `open_timeout`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ktn_core::{IceCandidate, SessionDescription, SignalingKind, SignalingPayload};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Result, SyncError};
use crate::transport::{
    ChannelState, ConnectionState, DataChannel, DirectTransport, PeerConnection, PeerEvent,
};

/// Default public STUN server.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Which side of the exchange this device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer and the data channel.
    Initiator,
    /// Accepts the offer and replies with an answer.
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    GatheringOffer,
    OfferReady,
    Connecting,
    GatheringAnswer,
    AnswerReady,
    Open,
    Failed,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Configuration for negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Upper bound on candidate gathering.
    pub gather_timeout: Duration,
    /// Upper bound on waiting for the channel to open.
    pub open_timeout: Duration,
    /// ICE server URLs handed to the transport.
    pub ice_servers: Vec<String>,
    /// Label of the data channel the initiator opens.
    pub channel_label: String,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            gather_timeout: Duration::from_secs(5),
            open_timeout: Duration::from_secs(30),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            channel_label: "ktn-sync".to_string(),
        }
    }
}

/// Drives one connection from `Idle` to an open channel.
pub struct Negotiator {
    role: Role,
    state: NegotiationState,
    config: NegotiationConfig,
    connection: Arc<dyn PeerConnection>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    channel: Option<Arc<dyn DataChannel>>,
    channel_open: bool,
    /// Events that arrived while waiting for something else.
    deferred: VecDeque<PeerEvent>,
}

impl Negotiator {
    /// Create a connection through `transport`.
    ///
    /// The initiator opens its data channel right away so the offer
    /// describes it.
    pub async fn new<T>(role: Role, transport: &T, config: NegotiationConfig) -> Result<Self>
    where
        T: DirectTransport + ?Sized,
    {
        let (connection, events) = transport.connect(&config.ice_servers).await?;
        let channel = match role {
            Role::Initiator => Some(connection.create_data_channel(&config.channel_label)?),
            Role::Responder => None,
        };
        Ok(Self {
            role,
            state: NegotiationState::Idle,
            config,
            connection,
            events,
            channel,
            channel_open: false,
            deferred: VecDeque::new(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// The data channel, once created or announced.
    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.clone()
    }

    fn require(&self, role: Role, state: NegotiationState, operation: &str) -> Result<()> {
        if self.role != role {
            return Err(SyncError::InvalidSignaling(format!(
                "{operation} is not available to the {:?}",
                self.role
            )));
        }
        if self.state != state {
            return Err(SyncError::InvalidSignaling(format!(
                "{operation} called in state {}",
                self.state
            )));
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: SyncError) -> Result<T> {
        if err.is_terminal() {
            self.state = NegotiationState::Failed;
        }
        Err(err)
    }

    /// Initiator: produce the offer to show the other device.
    pub async fn create_offer(&mut self) -> Result<SignalingPayload> {
        self.require(Role::Initiator, NegotiationState::Idle, "create_offer")?;
        self.state = NegotiationState::GatheringOffer;

        let offer = async {
            let sdp = self.connection.create_offer().await?;
            let candidates = self.gather().await?;
            Ok::<_, SyncError>(SessionDescription::new(sdp).with_candidates(candidates))
        }
        .await;

        match offer {
            Ok(description) => {
                self.state = NegotiationState::OfferReady;
                tracing::info!(candidates = description.candidates.len(), "offer ready");
                Ok(SignalingPayload::Offer(description))
            }
            Err(e) => {
                self.state = NegotiationState::Idle;
                self.fail(e)
            }
        }
    }

    /// Responder: apply a scanned offer and produce the answer.
    pub async fn accept_offer(&mut self, offer: SignalingPayload) -> Result<SignalingPayload> {
        self.require(Role::Responder, NegotiationState::Idle, "accept_offer")?;
        let remote = match offer {
            SignalingPayload::Offer(remote) => remote,
            other => {
                return Err(SyncError::InvalidSignaling(format!(
                    "expected an offer, got an {}",
                    other.kind()
                )))
            }
        };
        self.state = NegotiationState::GatheringAnswer;

        let answer = async {
            self.apply_remote(SignalingKind::Offer, &remote).await?;
            let sdp = self.connection.create_answer().await?;
            let candidates = self.gather().await?;
            Ok::<_, SyncError>(SessionDescription::new(sdp).with_candidates(candidates))
        }
        .await;

        match answer {
            Ok(description) => {
                self.state = NegotiationState::AnswerReady;
                tracing::info!(candidates = description.candidates.len(), "answer ready");
                Ok(SignalingPayload::Answer(description))
            }
            Err(e) => {
                self.state = NegotiationState::Idle;
                self.fail(e)
            }
        }
    }

    /// Initiator: apply the answer scanned from the other device.
    pub async fn apply_answer(&mut self, answer: SignalingPayload) -> Result<()> {
        self.require(Role::Initiator, NegotiationState::OfferReady, "apply_answer")?;
        let remote = match answer {
            SignalingPayload::Answer(remote) => remote,
            other => {
                return Err(SyncError::InvalidSignaling(format!(
                    "expected an answer, got an {}",
                    other.kind()
                )))
            }
        };

        match self.apply_remote(SignalingKind::Answer, &remote).await {
            Ok(()) => {
                self.state = NegotiationState::Connecting;
                tracing::info!("answer applied, connecting");
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    async fn apply_remote(&self, kind: SignalingKind, remote: &SessionDescription) -> Result<()> {
        self.connection
            .set_remote_description(kind, &remote.sdp)
            .await?;
        for candidate in &remote.candidates {
            self.connection.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Collect local candidates until gathering completes or times out.
    async fn gather(&mut self) -> Result<Vec<IceCandidate>> {
        let deadline = Instant::now() + self.config.gather_timeout;
        let mut candidates = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(PeerEvent::IceCandidate(candidate))) => candidates.push(candidate),
                Ok(Some(PeerEvent::GatheringComplete)) => break,
                Ok(Some(event)) => {
                    self.observe(&event)?;
                    self.deferred.push_back(event);
                }
                Ok(None) => {
                    return Err(SyncError::ConnectionFailed(
                        "transport dropped its event stream".into(),
                    ))
                }
                Err(_) => {
                    tracing::debug!(
                        candidates = candidates.len(),
                        "candidate gathering timed out, proceeding"
                    );
                    break;
                }
            }
        }
        Ok(candidates)
    }

    /// Update channel bookkeeping from an event and fail on terminal states.
    fn observe(&mut self, event: &PeerEvent) -> Result<()> {
        match event {
            PeerEvent::DataChannel(channel) => {
                if channel.ready_state() == ChannelState::Open {
                    self.channel_open = true;
                }
                self.channel = Some(Arc::clone(channel));
            }
            PeerEvent::ChannelOpen => self.channel_open = true,
            PeerEvent::ConnectionState(ConnectionState::Failed) => {
                return Err(SyncError::ConnectionFailed(
                    "transport reported failure".into(),
                ));
            }
            PeerEvent::ConnectionState(ConnectionState::Disconnected) => {
                tracing::warn!("connection disconnected, waiting for recovery");
            }
            PeerEvent::ConnectionState(state) => {
                tracing::debug!(?state, "connection state changed");
            }
            _ => {}
        }
        Ok(())
    }

    /// Wait until the data channel is open and usable.
    pub async fn wait_open(&mut self) -> Result<Arc<dyn DataChannel>> {
        if self.state == NegotiationState::Open {
            if let Some(channel) = &self.channel {
                return Ok(Arc::clone(channel));
            }
        }
        let ready = match self.role {
            Role::Initiator => NegotiationState::Connecting,
            Role::Responder => NegotiationState::AnswerReady,
        };
        self.require(self.role, ready, "wait_open")?;

        let open_timeout = self.config.open_timeout;
        let opened = tokio::time::timeout(open_timeout, self.until_open()).await;

        match opened {
            Ok(Ok(channel)) => {
                self.state = NegotiationState::Open;
                tracing::info!(label = channel.label(), "channel open");
                Ok(channel)
            }
            Ok(Err(e)) => self.fail(e),
            Err(_) => self.fail(SyncError::ConnectionTimeout(open_timeout)),
        }
    }

    async fn until_open(&mut self) -> Result<Arc<dyn DataChannel>> {
        // Events deferred during gathering are replayed first.
        for event in self.deferred.iter().cloned().collect::<Vec<_>>() {
            self.observe(&event)?;
            if matches!(event, PeerEvent::ChannelClosed) {
                return Err(SyncError::ChannelClosed);
            }
        }
        loop {
            if self.channel_open {
                if let Some(channel) = &self.channel {
                    return Ok(Arc::clone(channel));
                }
            }
            let event = self.events.recv().await.ok_or_else(|| {
                SyncError::ConnectionFailed("transport dropped its event stream".into())
            })?;
            self.observe(&event)?;
            match event {
                PeerEvent::ChannelClosed => return Err(SyncError::ChannelClosed),
                PeerEvent::ChannelMessage(_) => self.deferred.push_back(event),
                _ => {}
            }
        }
    }

    /// Next event after the channel opened. Deferred events come first.
    ///
    /// Returns `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        if let Some(event) = self.deferred.pop_front() {
            return Some(event);
        }
        let event = self.events.recv().await?;
        // The event itself still goes to the caller, which ends the exchange.
        if let Err(e) = self.observe(&event) {
            tracing::warn!(error = %e, "connection failed after open");
            self.state = NegotiationState::Failed;
        }
        Some(event)
    }

    /// Close the channel and the connection. Idempotent.
    pub fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.connection.close();
        self.deferred.clear();
        self.channel_open = false;
        self.state = NegotiationState::Closed;
        tracing::debug!(role = ?self.role, "negotiation closed");
    }
}

impl Drop for Negotiator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::{LoopbackNetwork, LoopbackOptions};
    use async_trait::async_trait;
    use std::sync::Mutex;

    async fn pair(network: &Arc<LoopbackNetwork>) -> (Negotiator, Negotiator) {
        let transport = network.transport();
        let initiator = Negotiator::new(Role::Initiator, &transport, NegotiationConfig::default())
            .await
            .unwrap();
        let responder = Negotiator::new(Role::Responder, &transport, NegotiationConfig::default())
            .await
            .unwrap();
        (initiator, responder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_negotiation() {
        let network = LoopbackNetwork::new();
        let (mut initiator, mut responder) = pair(&network).await;

        let offer = initiator.create_offer().await.unwrap();
        assert_eq!(initiator.state(), NegotiationState::OfferReady);
        assert_eq!(offer.description().candidates.len(), 2);

        let answer = responder.accept_offer(offer).await.unwrap();
        assert_eq!(responder.state(), NegotiationState::AnswerReady);

        initiator.apply_answer(answer).await.unwrap();
        assert_eq!(initiator.state(), NegotiationState::Connecting);

        let (a, b) = tokio::join!(initiator.wait_open(), responder.wait_open());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(initiator.state(), NegotiationState::Open);
        assert_eq!(responder.state(), NegotiationState::Open);

        a.send("ping").unwrap();
        loop {
            match responder.next_event().await.unwrap() {
                PeerEvent::ChannelMessage(frame) => {
                    assert_eq!(frame, "ping");
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(b.label(), "ktn-sync");

        initiator.close();
        responder.close();
        assert_eq!(network.live_peers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gathering_is_bounded() {
        let network = LoopbackNetwork::with_options(LoopbackOptions {
            stall_gathering: true,
            ..LoopbackOptions::default()
        });
        let (mut initiator, _responder) = pair(&network).await;

        let started = Instant::now();
        let offer = initiator.create_offer().await.unwrap();
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(5) && elapsed < Duration::from_millis(5100),
            "took {elapsed:?}"
        );
        assert_eq!(offer.description().candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_wrong_role_and_kind() {
        let network = LoopbackNetwork::new();
        let (mut initiator, mut responder) = pair(&network).await;

        assert!(matches!(
            responder.create_offer().await,
            Err(SyncError::InvalidSignaling(_))
        ));
        assert!(matches!(
            initiator
                .apply_answer(SignalingPayload::Answer(SessionDescription::new("v=0")))
                .await,
            Err(SyncError::InvalidSignaling(_))
        ));

        let offer = initiator.create_offer().await.unwrap();
        assert!(matches!(
            initiator.apply_answer(offer.clone()).await,
            Err(SyncError::InvalidSignaling(_))
        ));

        let not_an_offer = SignalingPayload::Answer(offer.into_description());
        assert!(matches!(
            responder.accept_offer(not_an_offer).await,
            Err(SyncError::InvalidSignaling(_))
        ));
        // Still usable after rejecting bad input.
        assert_eq!(responder.state(), NegotiationState::Idle);
        assert_eq!(initiator.state(), NegotiationState::OfferReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout() {
        let network = LoopbackNetwork::with_options(LoopbackOptions {
            never_open: true,
            ..LoopbackOptions::default()
        });
        let (mut initiator, mut responder) = pair(&network).await;

        let offer = initiator.create_offer().await.unwrap();
        let answer = responder.accept_offer(offer).await.unwrap();
        initiator.apply_answer(answer).await.unwrap();

        let err = initiator.wait_open().await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionTimeout(d) if d == Duration::from_secs(30)));
        assert_eq!(initiator.state(), NegotiationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure() {
        let network = LoopbackNetwork::with_options(LoopbackOptions {
            fail_connection: true,
            ..LoopbackOptions::default()
        });
        let (mut initiator, mut responder) = pair(&network).await;

        let offer = initiator.create_offer().await.unwrap();
        let answer = responder.accept_offer(offer).await.unwrap();
        initiator.apply_answer(answer).await.unwrap();

        let err = initiator.wait_open().await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailed(_)));
        let err = responder.wait_open().await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailed(_)));
    }

    /// Connection whose events are fed by the test.
    struct ScriptedPeer;

    #[async_trait]
    impl PeerConnection for ScriptedPeer {
        async fn create_offer(&self) -> Result<String> {
            Ok("v=0".into())
        }

        async fn create_answer(&self) -> Result<String> {
            Ok("v=0".into())
        }

        async fn set_remote_description(&self, _: SignalingKind, _: &str) -> Result<()> {
            Ok(())
        }

        async fn add_ice_candidate(&self, _: &IceCandidate) -> Result<()> {
            Ok(())
        }

        fn create_data_channel(&self, _: &str) -> Result<Arc<dyn DataChannel>> {
            let channel: Arc<dyn DataChannel> = Arc::new(IdleChannel);
            Ok(channel)
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::New
        }

        fn close(&self) {}
    }

    #[derive(Debug)]
    struct IdleChannel;

    impl DataChannel for IdleChannel {
        fn label(&self) -> &str {
            "idle"
        }

        fn ready_state(&self) -> ChannelState {
            ChannelState::Connecting
        }

        fn buffered_amount(&self) -> usize {
            0
        }

        fn send(&self, _: &str) -> Result<()> {
            Err(SyncError::ChannelClosed)
        }

        fn close(&self) {}
    }

    struct ScriptedTransport(Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>);

    #[async_trait]
    impl DirectTransport for ScriptedTransport {
        async fn connect(
            &self,
            _: &[String],
        ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>)> {
            let events = self.0.lock().unwrap().take().ok_or_else(|| {
                SyncError::ConnectionFailed("scripted transport already used".into())
            })?;
            let peer: Arc<dyn PeerConnection> = Arc::new(ScriptedPeer);
            Ok((peer, events))
        }
    }

    async fn scripted(role: Role) -> (Negotiator, mpsc::UnboundedSender<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ScriptedTransport(Mutex::new(Some(rx)));
        let negotiator = Negotiator::new(role, &transport, NegotiationConfig::default())
            .await
            .unwrap();
        (negotiator, tx)
    }

    fn bare_answer() -> SignalingPayload {
        SignalingPayload::Answer(SessionDescription::new("v=0"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_gathering_fails_open_at_once() {
        let (mut initiator, events) = scripted(Role::Initiator).await;
        events.send(PeerEvent::ChannelClosed).unwrap();
        events.send(PeerEvent::GatheringComplete).unwrap();
        initiator.create_offer().await.unwrap();
        initiator.apply_answer(bare_answer()).await.unwrap();

        let started = Instant::now();
        let err = initiator.wait_open().await.unwrap_err();
        assert!(matches!(err, SyncError::ChannelClosed));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(initiator.state(), NegotiationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_open_is_recorded() {
        let (mut initiator, events) = scripted(Role::Initiator).await;
        events.send(PeerEvent::GatheringComplete).unwrap();
        initiator.create_offer().await.unwrap();
        initiator.apply_answer(bare_answer()).await.unwrap();
        events.send(PeerEvent::ChannelOpen).unwrap();
        initiator.wait_open().await.unwrap();
        assert_eq!(initiator.state(), NegotiationState::Open);

        events
            .send(PeerEvent::ConnectionState(ConnectionState::Failed))
            .unwrap();
        assert!(matches!(
            initiator.next_event().await,
            Some(PeerEvent::ConnectionState(ConnectionState::Failed))
        ));
        assert_eq!(initiator.state(), NegotiationState::Failed);
    }
}
