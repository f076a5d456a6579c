//! Hostname hashing
//!
//! Clients are addressed internally by a 32-bit FNV-1a hash of their hostname.

use serde::Serialize;
use std::fmt;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Internal identifier of a client, derived from its hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Derive the client id for a hostname (FNV-1a, 32 bit).
pub fn client_id(hostname: &str) -> ClientId {
    let hash = hostname.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });
    ClientId(hash)
}
