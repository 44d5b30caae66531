// ── Identity types ──
//
// A device is known by two names: the controller-side `DeviceId` and the
// numeric id the P4Runtime server uses on the wire. Election ids order
// mastership claims.

use std::fmt;
use std::str::FromStr;

use p4rt_api::proto::Uint128;

// ── DeviceId ────────────────────────────────────────────────────────

/// Controller-side identifier of a network device (e.g. `device:leaf1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── ElectionId ──────────────────────────────────────────────────────

/// 128-bit mastership election id. The highest id known to the server wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ElectionId {
    high: u64,
    low: u64,
}

impl ElectionId {
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    pub const fn high(self) -> u64 {
        self.high
    }

    pub const fn low(self) -> u64 {
        self.low
    }

    #[allow(clippy::as_conversions)]
    pub const fn as_u128(self) -> u128 {
        ((self.high as u128) << 64) | self.low as u128
    }
}

impl From<u128> for ElectionId {
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    fn from(value: u128) -> Self {
        Self::new((value >> 64) as u64, value as u64)
    }
}

impl From<Uint128> for ElectionId {
    fn from(value: Uint128) -> Self {
        Self::new(value.high, value.low)
    }
}

impl From<ElectionId> for Uint128 {
    fn from(value: ElectionId) -> Self {
        Uint128::new(value.high, value.low)
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u128())
    }
}

// ── ClientKey ───────────────────────────────────────────────────────

/// Identifies the one client that may exist for a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub device_id: DeviceId,
    pub p4_device_id: u64,
}

impl ClientKey {
    pub fn new(device_id: impl Into<DeviceId>, p4_device_id: u64) -> Self {
        Self {
            device_id: device_id.into(),
            p4_device_id,
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.p4_device_id)
    }
}
