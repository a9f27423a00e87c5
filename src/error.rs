use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop the program before the interactive loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("unable to read client secret file {}: {source:#}", path.display())]
    Credentials {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("authentication failed: {0:#}")]
    Authentication(#[source] anyhow::Error),
    #[error("unable to create Gmail client: {0:#}")]
    Gateway(#[source] anyhow::Error),
    #[error("unable to retrieve messages: {0:#}")]
    InitialFetch(#[source] anyhow::Error),
}

/// Building an outgoing message failed; the draft is left as it was.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("failed to read attachment {}: {source}", path.display())]
    AttachmentRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
