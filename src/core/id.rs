use std::{
    fmt::Display,
    sync::Mutex,
};

use serde::{
    de::{
        Unexpected,
        Visitor,
    },
    Deserialize,
    Serialize,
};
use thiserror::Error;

/// An identifier used for correlating WAMP messages and naming router-allocated resources.
///
/// Ids must be representable exactly as a JSON number, so they are restricted to integers that fit
/// in 53 bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    pub const MIN: u64 = 1;
    pub const MAX: u64 = 1 << 53;
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
#[error("{value} is out of range for IDs")]
pub struct IdOutOfRange {
    value: u64,
}

impl IdOutOfRange {
    fn new(value: u64) -> Self {
        Self { value }
    }
}

impl TryFrom<u64> for Id {
    type Error = IdOutOfRange;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < Self::MIN || value > Self::MAX {
            Err(IdOutOfRange::new(value))
        } else {
            Ok(Id(value))
        }
    }
}

impl From<Id> for u64 {
    fn from(value: Id) -> Self {
        value.0
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "an unsigned integer in the range [{}, {}]",
            Id::MIN,
            Id::MAX
        )
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Id::try_from(v).map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u64(IdVisitor)
    }
}

/// Module for generating IDs for outbound requests.
///
/// Allocation is not async: release paths (dropping a subscription or registration handle) must be
/// able to allocate the request id for their final message outside of async context.
pub trait IdAllocator: Send + Sync {
    /// Generates a new ID.
    fn generate_id(&self) -> Id;

    /// Resets the allocator for a fresh session.
    fn reset(&self);
}

/// An [`IdAllocator`] that generates random IDs, with no uniqueness guarantee.
#[derive(Default)]
pub struct RandomIdAllocator {}

impl IdAllocator for RandomIdAllocator {
    fn generate_id(&self) -> Id {
        Id((rand::random::<u64>() & (Id::MAX - 1)) + 1)
    }

    fn reset(&self) {}
}

/// An [`IdAllocator`] that generates monotonically-increasing IDs from a seed.
///
/// The default seed is drawn uniformly from `[1, 2^24)`, so every session starts from a fresh
/// offset while leaving plenty of room before wrapping. A fixed seed gives deterministic request
/// ids.
pub struct SequentialIdAllocator {
    seed: u64,
    next: Mutex<u64>,
}

impl SequentialIdAllocator {
    /// Creates an allocator whose first generated ID is `seed`.
    pub fn starting_at(seed: u64) -> Self {
        let seed = seed.clamp(Id::MIN, Id::MAX);
        Self {
            seed,
            next: Mutex::new(seed),
        }
    }
}

impl Default for SequentialIdAllocator {
    fn default() -> Self {
        Self::starting_at((rand::random::<u64>() % ((1 << 24) - 1)) + 1)
    }
}

impl IdAllocator for SequentialIdAllocator {
    fn generate_id(&self) -> Id {
        let mut next = self.next.lock().unwrap();
        let id = *next;
        *next = if id >= Id::MAX { Id::MIN } else { id + 1 };
        Id(id)
    }

    fn reset(&self) {
        *self.next.lock().unwrap() = self.seed;
    }
}
