use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{EvaError, EvaResult};

pub const ENTITY_KEY_LEN: usize = 32;

/// Opaque caller-supplied entity identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntityKey(pub [u8; ENTITY_KEY_LEN]);

impl EntityKey {
    pub fn from_bytes(bytes: [u8; ENTITY_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> EvaResult<Self> {
        let raw: [u8; ENTITY_KEY_LEN] = bytes.try_into().map_err(|_| {
            EvaError::invalid(format!(
                "entity key must be {ENTITY_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    /// Accepts hex with or without a `0x` prefix.
    pub fn from_hex(value: &str) -> EvaResult<Self> {
        let trimmed = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        let bytes = hex::decode(trimmed)
            .map_err(|err| EvaError::invalid(format!("invalid entity key '{value}': {err}")))?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; ENTITY_KEY_LEN] {
        &self.0
    }

    pub fn as_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for EntityKey {
    type Err = EvaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for EntityKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        EntityKey::from_hex(&value).map_err(serde::de::Error::custom)
    }
}
