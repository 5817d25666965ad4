use std::path::PathBuf;

use rigsync_router::RouterError;

/// Errors on a replication channel.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("channel closed")]
    Closed,

    #[error("peer is {0} messages behind")]
    Lagging(usize),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors while materializing a follower job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no sequence for target {0}")]
    NoSequence(String),

    #[error("leader has no scheduler job")]
    NoJob,

    #[error("{0} was rejected by the rig")]
    Rejected(PathBuf),

    #[error(transparent)]
    Router(#[from] RouterError),
}

impl JobError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| JobError::Io { path, source }
    }
}

pub type JobResult<T> = Result<T, JobError>;

/// Errors of the node administration surface.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("operation is only available on a follower")]
    FollowerOnly,
}

pub type AdminResult<T> = Result<T, AdminError>;
