//! Direct-transport abstraction.
//!
//! A direct transport negotiates a peer-to-peer connection from an
//! offer/answer pair of session descriptions plus gathered reachability
//! candidates, and carries one ordered, reliable, message-oriented data
//! channel. Implementations may wrap WebRTC or anything with the same shape.
//!
//! Everything the connection and its channel report arrives as a
//! [`PeerEvent`] on one receiver, so a session can be driven by a single
//! message loop.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ktn_core::{IceCandidate, SignalingKind};
use tokio::sync::mpsc;

use crate::error::Result;

/// State of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    /// May recover on its own.
    Disconnected,
    Failed,
    Closed,
}

/// State of a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Everything a connection reports.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered.
    IceCandidate(IceCandidate),
    /// No more local candidates will be gathered.
    GatheringComplete,
    ConnectionState(ConnectionState),
    /// The remote side opened a channel towards us.
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen,
    /// One frame from the channel.
    ChannelMessage(String),
    ChannelClosed,
}

/// Factory for peer connections.
#[async_trait]
pub trait DirectTransport: Send + Sync {
    /// Create a fresh connection using the given ICE server URLs.
    async fn connect(
        &self,
        ice_servers: &[String],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>)>;
}

/// One side of a negotiated connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Produce the local offer description and start gathering candidates.
    async fn create_offer(&self) -> Result<String>;

    /// Produce the local answer description. Requires a remote offer.
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, kind: SignalingKind, sdp: &str) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Open a channel towards the remote. Called by the initiator before the offer.
    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;

    fn connection_state(&self) -> ConnectionState;

    /// Tear down the connection and its channels. Idempotent.
    fn close(&self);
}

/// An ordered, reliable, message-oriented pipe.
pub trait DataChannel: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ChannelState;

    /// Bytes queued locally but not yet handed to the network.
    fn buffered_amount(&self) -> usize;

    /// Send one frame. Fails with `ChannelClosed` unless the channel is open.
    fn send(&self, frame: &str) -> Result<()>;

    fn close(&self);
}

/// An in-process transport for testing.
///
/// Descriptions carry a token naming the peer that produced them; applying an
/// answer links the two peers found through the shared [`LoopbackNetwork`].
/// Candidates are synthetic and delivered after a short gathering delay.
///
/// [`LoopbackNetwork`]: loopback::LoopbackNetwork
pub mod loopback {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, MutexGuard, Weak};
    use std::time::Duration;

    use rand::Rng;

    use crate::error::SyncError;

    const TOKEN_ATTR: &str = "a=x-ktn-loopback:";

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Knobs for simulating slow or broken networks.
    #[derive(Debug, Clone)]
    pub struct LoopbackOptions {
        /// Delay before candidates are reported.
        pub gather_delay: Duration,
        /// Number of synthetic candidates per description.
        pub candidates: usize,
        /// Never report `GatheringComplete`.
        pub stall_gathering: bool,
        /// Link peers but never open the channel.
        pub never_open: bool,
        /// Report `Failed` instead of connecting.
        pub fail_connection: bool,
        /// Delay between linking and opening the channel.
        pub open_delay: Duration,
        /// Successive `buffered_amount` readings on each channel; 0 once
        /// exhausted.
        pub buffered_amounts: Vec<usize>,
    }

    impl Default for LoopbackOptions {
        fn default() -> Self {
            Self {
                gather_delay: Duration::from_millis(10),
                candidates: 2,
                stall_gathering: false,
                never_open: false,
                fail_connection: false,
                open_delay: Duration::ZERO,
                buffered_amounts: Vec::new(),
            }
        }
    }

    /// Registry of live loopback peers.
    pub struct LoopbackNetwork {
        peers: Mutex<HashMap<String, Weak<LoopbackPeer>>>,
        options: LoopbackOptions,
    }

    impl LoopbackNetwork {
        pub fn new() -> Arc<Self> {
            Self::with_options(LoopbackOptions::default())
        }

        pub fn with_options(options: LoopbackOptions) -> Arc<Self> {
            Arc::new(Self {
                peers: Mutex::new(HashMap::new()),
                options,
            })
        }

        /// A transport creating peers on this network.
        pub fn transport(self: &Arc<Self>) -> LoopbackTransport {
            LoopbackTransport {
                network: Arc::clone(self),
            }
        }

        /// Peers created and not yet closed.
        pub fn live_peers(&self) -> usize {
            lock(&self.peers)
                .values()
                .filter(|p| p.strong_count() > 0)
                .count()
        }

        fn register(&self, peer: &Arc<LoopbackPeer>) {
            lock(&self.peers).insert(peer.token.clone(), Arc::downgrade(peer));
        }

        fn unregister(&self, token: &str) {
            lock(&self.peers).remove(token);
        }

        fn lookup(&self, token: &str) -> Option<Arc<LoopbackPeer>> {
            lock(&self.peers).get(token).and_then(Weak::upgrade)
        }
    }

    /// [`DirectTransport`] over a [`LoopbackNetwork`].
    #[derive(Clone)]
    pub struct LoopbackTransport {
        network: Arc<LoopbackNetwork>,
    }

    #[async_trait]
    impl DirectTransport for LoopbackTransport {
        async fn connect(
            &self,
            ice_servers: &[String],
        ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>)> {
            let (events, rx) = mpsc::unbounded_channel();
            let token = hex::encode(rand::thread_rng().gen::<[u8; 8]>());
            let peer = Arc::new(LoopbackPeer {
                token,
                network: Arc::clone(&self.network),
                events,
                inner: Mutex::new(PeerInner {
                    remote: None,
                    channel: None,
                    state: ConnectionState::New,
                    closed: false,
                }),
            });
            self.network.register(&peer);
            tracing::debug!(
                token = %peer.token,
                ice_servers = ice_servers.len(),
                "loopback peer created"
            );
            let connection: Arc<dyn PeerConnection> = peer;
            Ok((connection, rx))
        }
    }

    struct PeerInner {
        remote: Option<Weak<LoopbackPeer>>,
        channel: Option<Arc<LoopbackChannel>>,
        state: ConnectionState,
        closed: bool,
    }

    /// One loopback connection.
    pub struct LoopbackPeer {
        token: String,
        network: Arc<LoopbackNetwork>,
        events: mpsc::UnboundedSender<PeerEvent>,
        inner: Mutex<PeerInner>,
    }

    impl LoopbackPeer {
        fn description(&self) -> String {
            format!(
                "v=0\r\no=- 0 2 IN IP4 127.0.0.1\r\ns=-\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n{TOKEN_ATTR}{}\r\n",
                self.token
            )
        }

        fn emit(&self, event: PeerEvent) {
            // The receiver is gone once the session has been torn down.
            let _ = self.events.send(event);
        }

        fn set_state(&self, state: ConnectionState) {
            lock(&self.inner).state = state;
            self.emit(PeerEvent::ConnectionState(state));
        }

        fn start_gathering(&self) {
            let events = self.events.clone();
            let options = self.network.options.clone();
            tokio::spawn(async move {
                tokio::time::sleep(options.gather_delay).await;
                for i in 0..options.candidates {
                    let candidate = IceCandidate::new(format!(
                        "candidate:{i} 1 udp 2122260223 127.0.0.1 {} typ host",
                        50000 + i
                    ));
                    if events.send(PeerEvent::IceCandidate(candidate)).is_err() {
                        return;
                    }
                }
                if !options.stall_gathering {
                    let _ = events.send(PeerEvent::GatheringComplete);
                }
            });
        }

        fn remote(&self) -> Option<Arc<LoopbackPeer>> {
            lock(&self.inner).remote.as_ref().and_then(Weak::upgrade)
        }

        /// Connect to `remote` and pair our channel with a new one on its side.
        fn link(&self, remote: &Arc<LoopbackPeer>) {
            let options = &self.network.options;
            self.set_state(ConnectionState::Connecting);
            remote.set_state(ConnectionState::Connecting);

            if options.fail_connection {
                self.set_state(ConnectionState::Failed);
                remote.set_state(ConnectionState::Failed);
                return;
            }

            self.set_state(ConnectionState::Connected);
            remote.set_state(ConnectionState::Connected);

            let Some(ours) = lock(&self.inner).channel.clone() else {
                return;
            };
            let theirs = LoopbackChannel::new(&ours.label, remote.events.clone(), options);
            lock(&ours.inner).remote = Arc::downgrade(&theirs);
            lock(&theirs.inner).remote = Arc::downgrade(&ours);
            lock(&remote.inner).channel = Some(Arc::clone(&theirs));
            let announced: Arc<dyn DataChannel> = theirs.clone();
            remote.emit(PeerEvent::DataChannel(announced));

            if options.never_open {
                return;
            }
            if options.open_delay.is_zero() {
                ours.open();
                theirs.open();
            } else {
                let delay = options.open_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    ours.open();
                    theirs.open();
                });
            }
        }
    }

    #[async_trait]
    impl PeerConnection for LoopbackPeer {
        async fn create_offer(&self) -> Result<String> {
            self.start_gathering();
            Ok(self.description())
        }

        async fn create_answer(&self) -> Result<String> {
            if self.remote().is_none() {
                return Err(SyncError::InvalidSignaling(
                    "answer requested before a remote offer was applied".into(),
                ));
            }
            self.start_gathering();
            Ok(self.description())
        }

        async fn set_remote_description(&self, kind: SignalingKind, sdp: &str) -> Result<()> {
            let token = sdp
                .lines()
                .find_map(|line| line.trim().strip_prefix(TOKEN_ATTR))
                .ok_or_else(|| {
                    SyncError::InvalidSignaling("description has no loopback token".into())
                })?;
            let remote = self.network.lookup(token).ok_or_else(|| {
                SyncError::ConnectionFailed(format!("loopback peer {token} is not reachable"))
            })?;
            lock(&self.inner).remote = Some(Arc::downgrade(&remote));

            if kind == SignalingKind::Answer {
                self.link(&remote);
            }
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
            if self.remote().is_none() {
                return Err(SyncError::InvalidSignaling(
                    "candidate added before the remote description".into(),
                ));
            }
            tracing::trace!(candidate = %candidate.candidate, "loopback candidate added");
            Ok(())
        }

        fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
            let channel =
                LoopbackChannel::new(label, self.events.clone(), &self.network.options);
            lock(&self.inner).channel = Some(Arc::clone(&channel));
            let channel: Arc<dyn DataChannel> = channel;
            Ok(channel)
        }

        fn connection_state(&self) -> ConnectionState {
            lock(&self.inner).state
        }

        fn close(&self) {
            let channel = {
                let mut inner = lock(&self.inner);
                if inner.closed {
                    return;
                }
                inner.closed = true;
                inner.channel.take()
            };
            if let Some(channel) = channel {
                channel.close();
            }
            self.set_state(ConnectionState::Closed);
            self.network.unregister(&self.token);
        }
    }

    #[derive(Debug)]
    struct ChannelInner {
        state: ChannelState,
        remote: Weak<LoopbackChannel>,
        frames_sent: usize,
        buffered: VecDeque<usize>,
    }

    /// Loopback data channel. Frames are delivered to the paired channel's
    /// event queue immediately; the buffered amount is whatever the network
    /// options script.
    #[derive(Debug)]
    pub struct LoopbackChannel {
        label: String,
        events: mpsc::UnboundedSender<PeerEvent>,
        inner: Mutex<ChannelInner>,
    }

    impl LoopbackChannel {
        fn new(
            label: &str,
            events: mpsc::UnboundedSender<PeerEvent>,
            options: &LoopbackOptions,
        ) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                events,
                inner: Mutex::new(ChannelInner {
                    state: ChannelState::Connecting,
                    remote: Weak::new(),
                    frames_sent: 0,
                    buffered: options.buffered_amounts.iter().copied().collect(),
                }),
            })
        }

        /// Open a connecting channel. A channel closed in the meantime stays
        /// closed.
        fn open(&self) {
            let mut inner = lock(&self.inner);
            if inner.state != ChannelState::Connecting {
                return;
            }
            inner.state = ChannelState::Open;
            drop(inner);
            let _ = self.events.send(PeerEvent::ChannelOpen);
        }

        /// Mark closed and report it. Returns false if already closed.
        fn mark_closed(&self) -> bool {
            let mut inner = lock(&self.inner);
            if inner.state == ChannelState::Closed {
                return false;
            }
            inner.state = ChannelState::Closed;
            drop(inner);
            let _ = self.events.send(PeerEvent::ChannelClosed);
            true
        }

        /// Frames sent through this end.
        pub fn frames_sent(&self) -> usize {
            lock(&self.inner).frames_sent
        }
    }

    impl DataChannel for LoopbackChannel {
        fn label(&self) -> &str {
            &self.label
        }

        fn ready_state(&self) -> ChannelState {
            lock(&self.inner).state
        }

        fn buffered_amount(&self) -> usize {
            lock(&self.inner).buffered.pop_front().unwrap_or(0)
        }

        fn send(&self, frame: &str) -> Result<()> {
            let remote = {
                let mut inner = lock(&self.inner);
                if inner.state != ChannelState::Open {
                    return Err(SyncError::ChannelClosed);
                }
                let remote = inner.remote.upgrade().ok_or(SyncError::ChannelClosed)?;
                inner.frames_sent += 1;
                remote
            };
            remote
                .events
                .send(PeerEvent::ChannelMessage(frame.to_string()))
                .map_err(|_| SyncError::ChannelClosed)
        }

        fn close(&self) {
            if !self.mark_closed() {
                return;
            }
            let remote = lock(&self.inner).remote.upgrade();
            if let Some(remote) = remote {
                remote.mark_closed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::loopback::{LoopbackNetwork, LoopbackOptions};
    use super::*;

    async fn next(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
        rx.recv().await.expect("event stream ended")
    }

    #[tokio::test]
    async fn test_loopback_link_and_message() {
        let network = LoopbackNetwork::new();
        let transport = network.transport();

        let (a, mut a_events) = transport.connect(&[]).await.unwrap();
        let (b, mut b_events) = transport.connect(&[]).await.unwrap();

        let a_channel = a.create_data_channel("ktn").unwrap();
        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(SignalingKind::Offer, &offer)
            .await
            .unwrap();
        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(SignalingKind::Answer, &answer)
            .await
            .unwrap();

        assert_eq!(a.connection_state(), ConnectionState::Connected);
        assert_eq!(a_channel.ready_state(), ChannelState::Open);

        let b_channel = loop {
            if let PeerEvent::DataChannel(channel) = next(&mut b_events).await {
                break channel;
            }
        };
        assert_eq!(b_channel.label(), "ktn");

        a_channel.send("hello").unwrap();
        loop {
            if let PeerEvent::ChannelMessage(frame) = next(&mut b_events).await {
                assert_eq!(frame, "hello");
                break;
            }
        }

        b.close();
        assert!(matches!(a_channel.send("late"), Err(crate::SyncError::ChannelClosed)));
        loop {
            if let PeerEvent::ChannelClosed = next(&mut a_events).await {
                break;
            }
        }
        a.close();
        assert_eq!(network.live_peers(), 0);
    }

    #[tokio::test]
    async fn test_gathering_reports_candidates() {
        let network = LoopbackNetwork::with_options(LoopbackOptions {
            candidates: 3,
            ..LoopbackOptions::default()
        });
        let (a, mut events) = network.transport().connect(&[]).await.unwrap();
        a.create_offer().await.unwrap();

        let mut candidates = 0;
        loop {
            match next(&mut events).await {
                PeerEvent::IceCandidate(_) => candidates += 1,
                PeerEvent::GatheringComplete => break,
                _ => {}
            }
        }
        assert_eq!(candidates, 3);
    }

    #[tokio::test]
    async fn test_unknown_token_fails() {
        let network = LoopbackNetwork::new();
        let (a, _events) = network.transport().connect(&[]).await.unwrap();

        let err = a
            .set_remote_description(SignalingKind::Offer, "v=0\r\na=x-ktn-loopback:nobody\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::SyncError::ConnectionFailed(_)));

        let err = a
            .set_remote_description(SignalingKind::Offer, "v=0\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::SyncError::InvalidSignaling(_)));
    }
}
