//! meridian-core — shared peer, subnet and record types plus configuration.
//! All other Meridian crates depend on this one.

pub mod config;
pub mod peer;
pub mod record;
pub mod subnet;

pub use peer::{Direction, PeerId, SessionId};
pub use record::{Encoding, Metadata, PeerRecord, RecordDecodeError, RecordInterest, Status};
pub use subnet::{AttestationSubnets, SubnetId, ATTESTATION_SUBNET_COUNT};
