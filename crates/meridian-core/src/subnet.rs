//! Attestation subnets and the `attnets` capability bitfield.
//!
//! The bitfield uses SSZ `Bitvector[64]` layout: bit `i` lives in byte
//! `i / 8` at bit position `i % 8`. The encoded form is always 8 bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::RecordDecodeError;

/// Number of attestation subnets a peer can advertise.
pub const ATTESTATION_SUBNET_COUNT: u8 = 64;

const ATTNETS_BYTES: usize = ATTESTATION_SUBNET_COUNT as usize / 8;

/// A single gossip topic partition. Always `< ATTESTATION_SUBNET_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SubnetId(u8);

impl SubnetId {
    pub fn new(id: u8) -> Option<Self> {
        (id < ATTESTATION_SUBNET_COUNT).then_some(Self(id))
    }
}

impl fmt::Display for SubnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("subnet id {0} out of range (max {max})", max = ATTESTATION_SUBNET_COUNT - 1)]
pub struct SubnetOutOfRange(pub u64);

impl TryFrom<u8> for SubnetId {
    type Error = SubnetOutOfRange;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id).ok_or(SubnetOutOfRange(id as u64))
    }
}

impl From<SubnetId> for u8 {
    fn from(id: SubnetId) -> u8 {
        id.0
    }
}

/// Gossip layers name subnets as decimal strings ("5"), so accept that form.
impl FromStr for SubnetId {
    type Err = SubnetOutOfRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u64 = s.trim().parse().map_err(|_| SubnetOutOfRange(u64::MAX))?;
        u8::try_from(n)
            .ok()
            .and_then(SubnetId::new)
            .ok_or(SubnetOutOfRange(n))
    }
}

/// The set of subnets a peer claims to serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationSubnets(u64);

impl AttestationSubnets {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_subnets(subnets: impl IntoIterator<Item = SubnetId>) -> Self {
        let mut bits = Self::empty();
        for subnet in subnets {
            bits.set(subnet, true);
        }
        bits
    }

    /// Decode the SSZ form. Anything other than exactly 8 bytes is malformed.
    pub fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, RecordDecodeError> {
        let raw: [u8; ATTNETS_BYTES] =
            bytes.try_into().map_err(|_| RecordDecodeError::InvalidLength {
                expected: ATTNETS_BYTES,
                actual: bytes.len(),
            })?;
        Ok(Self(u64::from_le_bytes(raw)))
    }

    pub fn to_ssz_bytes(self) -> [u8; ATTNETS_BYTES] {
        self.0.to_le_bytes()
    }

    pub fn get(self, subnet: SubnetId) -> bool {
        self.0 & (1u64 << subnet.0) != 0
    }

    pub fn set(&mut self, subnet: SubnetId, value: bool) {
        if value {
            self.0 |= 1u64 << subnet.0;
        } else {
            self.0 &= !(1u64 << subnet.0);
        }
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = SubnetId> {
        (0..ATTESTATION_SUBNET_COUNT)
            .map(SubnetId)
            .filter(move |s| self.get(*s))
    }
}
