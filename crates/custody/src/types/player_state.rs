use serde::{Deserialize, Serialize};

/// Opaque snapshot of one player's mutable data.
///
/// The coordinator never looks inside the payload; the host application owns
/// its binary encoding. Ownership of the record is tracked out-of-band by the
/// shared lock flag, never inside the payload itself.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PlayerState(pub Vec<u8>);

impl PlayerState {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for PlayerState {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}
