//! Serde helpers for durations stored as integer milliseconds
//!
//! Configuration files express every interval in milliseconds:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use serde::{Deserialize, Serialize};
//! use steadfast_core::{duration_millis, option_duration_millis};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Example {
//!     #[serde(with = "duration_millis")]
//!     timeout: Duration,
//!     #[serde(default, with = "option_duration_millis")]
//!     deadline: Option<Duration>,
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

fn to_millis(duration: &Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `Duration` as a `u64` millisecond count
pub mod duration_millis {
    use super::*;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(to_millis(duration))
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// `Option<Duration>` as an optional `u64` millisecond count
pub mod option_duration_millis {
    use super::*;

    /// Serialize `Some(duration)` as milliseconds and `None` as null
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&to_millis(d)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional milliseconds into an optional Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
