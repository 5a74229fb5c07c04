//! meridian-peers — per-peer state and subnet peer search.
//!
//! The metadata store, score tracker, discovery adapter and subnet search,
//! plus the interfaces of the collaborators they drive (transport,
//! request/response, gossip, record service).

pub mod discovery;
pub mod local;
pub mod protocol;
pub mod score;
pub mod search;
pub mod store;
pub mod transport;

pub use discovery::{classify, DiscoveryAdapter, RecordService, SkipReason, Verdict};
pub use local::LocalMetadata;
pub use protocol::{CapabilityQueryError, Gossip, ReqResp};
pub use score::{Outcome, ScoreParams, ScoreTracker};
pub use search::{SearchParams, SearchReport, SubnetPeerSearch};
pub use store::{MetadataEntry, PeerMetadataStore};
pub use transport::{ConnectionInfo, DialError, HangUpError, PeerInfo, Transport, TransportEvent};
