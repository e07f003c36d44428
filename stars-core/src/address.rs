//! Peer addresses — the 1-D key space the overlay tree is ordered by.
//!
//! Mirrors `CommAddress` in the original STaRS implementation
//! (`include/CommAddress.hpp`): an address orders as `ip + port / 65536`,
//! so two addresses with different IPs never compare equal regardless of
//! port, and within one IP higher ports sort after lower ones.  Because the
//! fractional term is always `< 1.0`, ordering by that value is exactly
//! ordering by the `(ip, port)` tuple — we derive `Ord` directly on the
//! tuple and keep `value()` only for distance arithmetic and logging.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// A peer's network identity, and its key in the overlay's 1-D address
/// space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    ip: u32,
    port: u16,
}

impl Address {
    /// Construct from an IPv4 address and port.
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Address {
            ip: u32::from(ip),
            port,
        }
    }

    /// Construct from the IP already in host-order `u32` form.
    pub fn from_u32(ip: u32, port: u16) -> Self {
        Address { ip, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    pub fn ip_u32(&self) -> u32 {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The scalar used to order and space addresses: `ip + port / 65536`.
    pub fn value(&self) -> f64 {
        self.ip as f64 + (self.port as f64) / 65536.0
    }

    /// Absolute distance between two addresses in the 1-D key space.
    pub fn distance(&self, other: &Address) -> f64 {
        (self.value() - other.value()).abs()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}
