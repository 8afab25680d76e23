//! Validated identifier newtypes.
//!
//! Identifiers are non-empty, at most [`MAX_ID_LEN`] characters and restricted
//! to `[A-Za-z0-9._:/-]`. They implement `Borrow<str>` so keyed maps can be
//! queried with a plain `&str`.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum identifier length
pub const MAX_ID_LEN: usize = 256;

fn validate_id(kind: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() {
        return Err(GatewayError::validation(
            format!("{kind} cannot be empty"),
            Some(kind.to_string()),
            "empty_id",
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(GatewayError::validation(
            format!("{kind} exceeds {MAX_ID_LEN} characters"),
            Some(kind.to_string()),
            "id_too_long",
        ));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-')))
    {
        return Err(GatewayError::validation(
            format!("{kind} contains invalid character '{bad}'"),
            Some(kind.to_string()),
            "invalid_id",
        ));
    }
    Ok(())
}

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a validated identifier
            ///
            /// # Errors
            /// Returns a validation error for empty, oversized or malformed ids
            pub fn new(value: impl Into<String>) -> GatewayResult<Self> {
                let value = value.into();
                validate_id($kind, &value)?;
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = GatewayError;

            fn try_from(value: &str) -> GatewayResult<Self> {
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = GatewayError;

            fn try_from(value: String) -> GatewayResult<Self> {
                Self::new(value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

validated_id!(
    /// Unique model identifier within the registry
    ModelId,
    "model_id"
);

validated_id!(
    /// Provider identifier; the failure domain shared by its models
    ProviderId,
    "provider_id"
);

validated_id!(
    /// Request identifier carried through logs, events and responses
    RequestId,
    "request_id"
);

impl RequestId {
    /// Generate a fresh random request id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

/// Handle returned when a request is parked in the degradation queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueTicket(u64);

impl QueueTicket {
    /// Allocate the next process-unique ticket
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TICKET.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the ticket
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q-{}", self.0)
    }
}
