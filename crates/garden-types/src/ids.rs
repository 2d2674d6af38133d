//! Identifier types.
//!
//! Gardens are keyed by a device-assigned external identifier. Field
//! devices send it either as a JSON string or as a bare integer, so
//! [`GardenId`] accepts both and normalizes to the decimal string form.
//! Viewer sessions are server-assigned and use UUID v7.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Maximum length in characters of a garden identifier.
pub const MAX_GARDEN_ID_LEN: usize = 128;

/// Stable external identifier of a garden, assigned by the field device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GardenId(String);

impl GardenId {
    /// Parse a garden identifier from text.
    ///
    /// Surrounding whitespace is trimmed. Returns `None` if the result is
    /// empty or longer than [`MAX_GARDEN_ID_LEN`] characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_GARDEN_ID_LEN {
            return None;
        }
        Some(Self(trimmed.to_owned()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for GardenId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for GardenId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Integer(i64),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Integer(n) => n.to_string(),
        };
        Self::parse(&text).ok_or_else(|| {
            de::Error::custom(format!(
                "garden_id must be 1..={MAX_GARDEN_ID_LEN} non-blank characters"
            ))
        })
    }
}

/// Unique identifier for a connected viewer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ViewerId(pub Uuid);

impl ViewerId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn garden_id_accepts_integer_and_string() {
        let from_int: GardenId = serde_json::from_str("7").unwrap();
        let from_str: GardenId = serde_json::from_str("\"7\"").unwrap();
        assert_eq!(from_int, from_str);
        assert_eq!(from_int.as_str(), "7");
    }

    #[test]
    fn garden_id_rejects_blank_and_oversized() {
        assert!(serde_json::from_str::<GardenId>("\"   \"").is_err());
        let long = format!("\"{}\"", "x".repeat(MAX_GARDEN_ID_LEN + 1));
        assert!(serde_json::from_str::<GardenId>(&long).is_err());
        assert!(serde_json::from_str::<GardenId>("1.5").is_err());
        assert!(serde_json::from_str::<GardenId>("null").is_err());
    }

    #[test]
    fn garden_id_trims_whitespace() {
        assert_eq!(GardenId::parse("  north-plot ").map(|g| g.0), Some("north-plot".to_owned()));
    }

    #[test]
    fn viewer_ids_are_unique() {
        assert_ne!(ViewerId::new(), ViewerId::new());
    }
}
