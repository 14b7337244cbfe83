// Core ID types for the room-relay protocol.
//
// `PlayerId` is a relay-scoped ephemeral handle: the relay assigns compact
// integer IDs per connection, and they mean nothing once the connection is
// gone. `RoomId` is the user-facing 6-digit room code, a validated newtype
// so malformed codes are rejected at the edge instead of leaking into the
// registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of digits in a room code.
pub const ROOM_ID_LEN: usize = 6;

/// Relay-assigned ephemeral player handle (compact u32, per connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

/// A 6-digit room code, e.g. "482913".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Validate a room code: exactly `ROOM_ID_LEN` ASCII digits.
    pub fn parse(value: &str) -> Result<Self, RoomIdError> {
        if value.len() != ROOM_ID_LEN {
            return Err(RoomIdError::InvalidLength {
                expected: ROOM_ID_LEN,
                found: value.len(),
            });
        }
        for (idx, ch) in value.chars().enumerate() {
            if !ch.is_ascii_digit() {
                return Err(RoomIdError::InvalidCharacter { ch, index: idx });
            }
        }
        Ok(Self(value.to_string()))
    }

    /// Build a room id from a numeric code. Codes outside [100000, 999999]
    /// don't have six digits and fail validation.
    pub fn from_code(code: u32) -> Result<Self, RoomIdError> {
        Self::parse(&code.to_string())
    }

    /// Sanitize raw user input for a room-code field: keep digits only,
    /// truncated to `ROOM_ID_LEN`. The result may still be too short to
    /// `parse`; presentation feeds keystrokes through this before
    /// submitting.
    pub fn sanitize(input: &str) -> String {
        input
            .chars()
            .filter(char::is_ascii_digit)
            .take(ROOM_ID_LEN)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Why a room code failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomIdError {
    InvalidLength { expected: usize, found: usize },
    InvalidCharacter { ch: char, index: usize },
}

impl fmt::Display for RoomIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomIdError::InvalidLength { expected, found } => {
                write!(f, "room code must be {expected} digits, got {found}")
            }
            RoomIdError::InvalidCharacter { ch, index } => {
                write!(f, "invalid character '{ch}' at position {index}")
            }
        }
    }
}

impl std::error::Error for RoomIdError {}

/// Milliseconds since the Unix epoch. Used to stamp relayed messages with
/// server time and game messages with emission time.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
