use meridian_core::PeerId;
use meridian_peers::DialError;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("network already started")]
    AlreadyStarted,
    #[error("network not started")]
    NotStarted,
    #[error("failed to dial {peer}: {source}")]
    Dial {
        peer: PeerId,
        #[source]
        source: DialError,
    },
    #[error("startup failed: {0:#}")]
    Startup(anyhow::Error),
}
