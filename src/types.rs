//! Shared domain types.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ── Contact identifier ──────────────────────────────────────────────

/// Opaque contact identifier (usually an E.164 phone number).
///
/// Only equality matters; no normalization beyond trimming whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContactId(String);

impl ContactId {
    /// Parse a contact identifier, rejecting blank input.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingContact);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContactId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ContactId> for String {
    fn from(id: ContactId) -> Self {
        id.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Message timestamps ──────────────────────────────────────────────

/// Legacy timestamp layouts accepted on ingest, tried after RFC 3339.
/// Naive values are interpreted as UTC.
const LEGACY_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// When a message was received or sent.
///
/// A timestamp that could not be parsed is kept verbatim instead of being
/// dropped; such entries order after every well-formed instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageTime {
    At(DateTime<Utc>),
    Unparsed(String),
}

impl MessageTime {
    /// Parse a raw timestamp string.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Self::At(dt.with_timezone(&Utc));
        }
        for format in LEGACY_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Self::At(naive.and_utc());
            }
        }
        Self::Unparsed(raw.to_string())
    }

    /// The instant, if the timestamp is well-formed.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(dt) => Some(*dt),
            Self::Unparsed(_) => None,
        }
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self, Self::Unparsed(_))
    }

    /// Ordering key: well-formed instants first (ascending), then every
    /// unparsed timestamp as one equal bucket.
    pub(crate) fn sort_key(&self) -> (u8, Option<DateTime<Utc>>) {
        match self {
            Self::At(dt) => (0, Some(*dt)),
            Self::Unparsed(_) => (1, None),
        }
    }
}

impl From<DateTime<Utc>> for MessageTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::At(dt)
    }
}

impl fmt::Display for MessageTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Unparsed(raw) => write!(f, "{raw}"),
        }
    }
}

// ── Direction ───────────────────────────────────────────────────────

/// Which log a conversation entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}
