//! Device identity: an opaque device id plus a signing keypair.
//!
//! The identity is created once per installation. The keys are stored
//! alongside the id but sync payloads are not signed with them yet.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CoreError;

/// Length of a device id in bytes.
pub const DEVICE_ID_LEN: usize = 16;

/// Current version of the persisted identity record.
const RECORD_VERSION: u8 = 1;

/// A random 128-bit device identifier, hex-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub [u8; DEVICE_ID_LEN]);

impl DeviceId {
    /// Generate a random device id.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    pub const fn from_bytes(bytes: [u8; DEVICE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidDeviceId(e.to_string()))?;
        let arr: [u8; DEVICE_ID_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidDeviceId(format!("expected {DEVICE_ID_LEN} bytes")))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DeviceId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePublicKey(pub [u8; 32]);

impl DevicePublicKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short human-comparable fingerprint, e.g. `3f1a-9c02-77de-b410`.
    ///
    /// Derived as Blake3("ktn-device-fingerprint-v1:" || key), first 8 bytes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ktn-device-fingerprint-v1:");
        hasher.update(&self.0);
        let digest = hasher.finalize();
        digest.as_bytes()[..8]
            .chunks(2)
            .map(hex::encode)
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Debug for DevicePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePublicKey({})", &self.to_hex()[..16])
    }
}

/// Signing keypair for a device.
#[derive(Clone)]
pub struct DeviceKeypair {
    signing_key: SigningKey,
}

impl DeviceKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> DevicePublicKey {
        DevicePublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for DeviceKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceKeypair({:?})", self.public_key())
    }
}

/// A device's persistent identity.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    device_id: DeviceId,
    keypair: DeviceKeypair,
}

/// On-disk form of an identity.
#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    version: u8,
    device_id: [u8; DEVICE_ID_LEN],
    public_key: [u8; 32],
    seed: [u8; 32],
}

impl DeviceIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            device_id: DeviceId::random(),
            keypair: DeviceKeypair::generate(),
        }
    }

    pub fn from_parts(device_id: DeviceId, keypair: DeviceKeypair) -> Self {
        Self { device_id, keypair }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn keypair(&self) -> &DeviceKeypair {
        &self.keypair
    }

    pub fn public_key(&self) -> DevicePublicKey {
        self.keypair.public_key()
    }

    pub fn fingerprint(&self) -> String {
        self.public_key().fingerprint()
    }

    /// Encode as a CBOR record for the settings store.
    pub fn to_record_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let record = IdentityRecord {
            version: RECORD_VERSION,
            device_id: self.device_id.0,
            public_key: self.public_key().0,
            seed: self.keypair.seed(),
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&record, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a record written by [`to_record_bytes`](Self::to_record_bytes).
    ///
    /// The stored public key must match the one derived from the seed.
    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let record: IdentityRecord = ciborium::de::from_reader(bytes)
            .map_err(|e| CoreError::InvalidIdentity(e.to_string()))?;

        if record.version != RECORD_VERSION {
            return Err(CoreError::InvalidIdentity(format!(
                "unsupported record version {}",
                record.version
            )));
        }

        let keypair = DeviceKeypair::from_seed(&record.seed);
        if keypair.public_key().0 != record.public_key {
            return Err(CoreError::InvalidIdentity(
                "public key does not match private key".into(),
            ));
        }

        Ok(Self {
            device_id: DeviceId(record.device_id),
            keypair,
        })
    }
}
