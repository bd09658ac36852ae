//! The engine: identity bootstrap and pairing entry points.
//!
//! An engine owns a store, a transport and the device identity, and runs at
//! most one pairing session at a time.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ktn_core::{DeviceId, DeviceIdentity};
use ktn_store::{EntityStore, SettingsStore};
use ktn_sync::{DirectTransport, EventSink, Role, SyncSession};
use tokio::sync::Mutex;

use crate::config::{EngineConfig, IDENTITY_SETTING_KEY};
use crate::error::{EngineError, Result};

/// The main engine struct.
///
/// Provides a unified API for:
/// - Creating and loading the device identity
/// - Starting pairing sessions as initiator or responder
/// - Resetting the device
pub struct SyncEngine<S, T> {
    store: Arc<S>,
    transport: T,
    config: EngineConfig,
    /// Loaded identity. The lock also serializes first-time generation.
    identity: Mutex<Option<DeviceIdentity>>,
    busy: Arc<AtomicBool>,
}

impl<S, T> SyncEngine<S, T>
where
    S: EntityStore + SettingsStore,
    T: DirectTransport,
{
    pub fn new(store: Arc<S>, transport: T, config: EngineConfig) -> Self {
        Self {
            store,
            transport,
            config,
            identity: Mutex::new(None),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a pairing session is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the device identity, creating and persisting one on first use.
    ///
    /// Idempotent: later calls return the same id without regenerating.
    pub async fn ensure_identity(&self) -> Result<DeviceId> {
        let mut cached = self.identity.lock().await;
        if let Some(identity) = cached.as_ref() {
            return Ok(identity.device_id());
        }

        let identity = match self.load_identity().await? {
            Some(identity) => {
                tracing::debug!(device = %identity.device_id(), "identity loaded");
                identity
            }
            None => {
                let identity = DeviceIdentity::generate();
                self.save_identity(&identity).await?;
                tracing::info!(
                    device = %identity.device_id(),
                    fingerprint = %identity.fingerprint(),
                    "identity created"
                );
                identity
            }
        };

        let device_id = identity.device_id();
        *cached = Some(identity);
        Ok(device_id)
    }

    /// The loaded identity, if `ensure_identity` has succeeded.
    pub async fn identity(&self) -> Option<DeviceIdentity> {
        self.identity.lock().await.clone()
    }

    /// Discard the identity and create a new one. Part of a full device
    /// reset; refused while a session is running.
    pub async fn reset_identity(&self) -> Result<DeviceId> {
        if self.is_busy() {
            return Err(EngineError::SessionBusy);
        }
        {
            let mut cached = self.identity.lock().await;
            self.store
                .delete_setting(IDENTITY_SETTING_KEY)
                .await
                .map_err(|e| EngineError::IdentityStore(e.to_string()))?;
            *cached = None;
        }
        tracing::info!("identity reset");
        self.ensure_identity().await
    }

    async fn load_identity(&self) -> Result<Option<DeviceIdentity>> {
        let stored = self
            .store
            .get_setting(IDENTITY_SETTING_KEY)
            .await
            .map_err(|e| EngineError::IdentityStore(e.to_string()))?;
        let Some(encoded) = stored else {
            return Ok(None);
        };

        let bytes = hex::decode(encoded.trim())
            .map_err(|e| EngineError::IdentityStore(format!("record is not hex: {e}")))?;
        let identity = DeviceIdentity::from_record_bytes(&bytes)
            .map_err(|e| EngineError::IdentityStore(e.to_string()))?;
        Ok(Some(identity))
    }

    async fn save_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        let bytes = identity
            .to_record_bytes()
            .map_err(|e| EngineError::IdentityStore(e.to_string()))?;
        self.store
            .set_setting(IDENTITY_SETTING_KEY, &hex::encode(bytes))
            .await
            .map_err(|e| EngineError::IdentityStore(e.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pairing
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a pairing session.
    ///
    /// Fails with [`EngineError::SessionBusy`] while another session from
    /// this engine is alive. The slot is released when the returned session
    /// is closed or dropped.
    pub async fn begin_pairing(&self, role: Role, events: EventSink) -> Result<PairingSession<S>> {
        let device_id = self.ensure_identity().await?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(?role, "pairing refused, session already active");
            return Err(EngineError::SessionBusy);
        }
        let guard = SessionGuard {
            busy: Arc::clone(&self.busy),
            released: false,
        };

        let session = SyncSession::new(
            role,
            Arc::clone(&self.store),
            &self.transport,
            device_id,
            self.config.sync.clone(),
            events,
        )
        .await?;

        tracing::info!(?role, device = %device_id, "pairing started");
        Ok(PairingSession { session, guard })
    }
}

/// Holds the engine's single session slot.
struct SessionGuard {
    busy: Arc<AtomicBool>,
    released: bool,
}

impl SessionGuard {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.busy.store(false, Ordering::Release);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A running pairing session. Dereferences to [`SyncSession`].
pub struct PairingSession<S: EntityStore> {
    session: SyncSession<S>,
    guard: SessionGuard,
}

impl<S: EntityStore> PairingSession<S> {
    /// Tear the session down and free the engine for another one.
    pub fn close(&mut self) {
        self.session.close();
        self.guard.release();
    }
}

impl<S: EntityStore> Deref for PairingSession<S> {
    type Target = SyncSession<S>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<S: EntityStore> DerefMut for PairingSession<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}
