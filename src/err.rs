#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] nix::Error),
}
