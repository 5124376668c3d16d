//! Base persistence shape shared by every stored entity.
//!
//! A record carries an opaque id (blank until assigned) and two UTC
//! timestamps. The Unix epoch doubles as the "never persisted" sentinel.

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// Timestamp marking a record that has never been persisted.
pub fn zero_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Identity and timestamps of a stored entity.
///
/// ## Invariants
/// - `created_at` is either the zero timestamp or at most `updated_at`.
/// - Once stamped, `updated_at` only moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Opaque identifier; blank until the store assigns one.
    #[serde(default)]
    pub id: String,
    /// First persistence time, or the zero timestamp.
    #[serde(default = "zero_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last persistence time, or the zero timestamp.
    #[serde(default = "zero_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Default for Record {
    fn default() -> Self {
        Self::with_id("")
    }
}

impl Record {
    /// Unpersisted record with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: zero_timestamp(),
            updated_at: zero_timestamp(),
        }
    }

    /// Whether the record has been stamped at least once.
    pub fn is_persisted(&self) -> bool {
        self.created_at != zero_timestamp()
    }

    /// Stamp the record for a write happening at `now`.
    ///
    /// `updated_at` becomes `now`, or the previous value plus one microsecond
    /// when the clock has not moved past it. `created_at` is filled from
    /// `updated_at` the first time only.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + TimeDelta::microseconds(1);
        self.updated_at = if self.updated_at != zero_timestamp() && now < floor {
            floor
        } else {
            now
        };
        if !self.is_persisted() {
            self.created_at = self.updated_at;
        }
    }
}

/// Entities that embed a [`Record`].
pub trait Timestamped {
    /// Embedded record.
    fn record(&self) -> &Record;
    /// Mutable embedded record.
    fn record_mut(&mut self) -> &mut Record;
}

impl Timestamped for Record {
    fn record(&self) -> &Record {
        self
    }

    fn record_mut(&mut self) -> &mut Record {
        self
    }
}

/// Return `value` with its record stamped from `clock`.
///
/// # Examples
/// ```
/// use mockable::DefaultClock;
/// use secure_notes::domain::{update_timestamp, Record};
///
/// let stamped = update_timestamp(Record::default(), &DefaultClock);
/// assert!(stamped.is_persisted());
/// assert_eq!(stamped.created_at, stamped.updated_at);
/// ```
pub fn update_timestamp<T: Timestamped>(mut value: T, clock: &dyn Clock) -> T {
    value.record_mut().stamp(clock.utc());
    value
}
