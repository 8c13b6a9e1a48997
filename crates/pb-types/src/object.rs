use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length in bytes of every object identifier.
pub const OBJECT_ID_SIZE: usize = 20;

/// Fixed-length binary identifier naming an object in the store.
///
/// Identifiers are supplied by the caller and are opaque to the bridge: the
/// store never derives them from content. [`ObjectId::derive`] exists for
/// callers that prefer to name objects with strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_SIZE]);

impl ObjectId {
    /// Build an identifier from its exact binary form.
    pub fn from_binary(data: &[u8]) -> Result<Self, TypeError> {
        if data.len() != OBJECT_ID_SIZE {
            return Err(TypeError::InvalidLength {
                expected: OBJECT_ID_SIZE,
                actual: data.len(),
            });
        }
        let mut arr = [0u8; OBJECT_ID_SIZE];
        arr.copy_from_slice(data);
        Ok(Self(arr))
    }

    /// Derive an identifier from a human-readable name.
    ///
    /// The name is hashed with BLAKE3 and truncated, so the same name always
    /// maps to the same identifier.
    pub fn derive(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        let mut arr = [0u8; OBJECT_ID_SIZE];
        arr.copy_from_slice(&hash.as_bytes()[..OBJECT_ID_SIZE]);
        Self(arr)
    }

    /// A uniformly random identifier.
    pub fn random() -> Self {
        let mut arr = [0u8; OBJECT_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut arr);
        Self(arr)
    }

    /// The raw identifier bytes.
    pub fn binary(&self) -> &[u8; OBJECT_ID_SIZE] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_binary(&bytes)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; OBJECT_ID_SIZE]> for ObjectId {
    fn from(bytes: [u8; OBJECT_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for ObjectId {
    type Error = TypeError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Self::from_binary(data)
    }
}
