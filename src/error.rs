use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid parameters: {0}")]
    Params(String),

    #[error("invalid cron expression {expr:?}: {reason}")]
    CronExprParse { expr: String, reason: String },

    #[error("unsupported exec type: {0}")]
    UnsupportedExecType(String),

    #[error("file job requires a file reference")]
    MissingFileRef,

    #[error("invalid node address {0:?}, expected host:port")]
    InvalidAddress(String),

    #[error("invalid artifact name: {0:?}")]
    InvalidFileName(String),

    #[error("job not found: {0}")]
    JobNotFound(i64),

    #[error("node not found: {0}")]
    NodeNotExists(i64),

    #[error("artifact not found: {0}")]
    FileNotExist(String),

    #[error("job record not found: {0}")]
    RecordNotFound(i64),

    #[error("failed to sync job to node")]
    SyncJobToNode,

    #[error("failed to sync exec file to node")]
    SyncExecFileToNode,

    #[error("user does not have permission for this job")]
    UserNotPermission,

    #[error("missing user identity")]
    Unauthenticated,

    #[error("node {0} is still referenced by jobs")]
    JobUseCurrentNode(i64),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric code carried in the response envelope. Zero is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            Error::Params(_) => 1001,
            Error::Unauthenticated => 1002,
            Error::CronExprParse { .. } => 2001,
            Error::UnsupportedExecType(_) => 2002,
            Error::MissingFileRef => 2003,
            Error::InvalidAddress(_) => 2004,
            Error::InvalidFileName(_) => 2005,
            Error::JobNotFound(_) => 3001,
            Error::NodeNotExists(_) => 3002,
            Error::FileNotExist(_) => 3003,
            Error::RecordNotFound(_) => 3004,
            Error::SyncJobToNode => 4001,
            Error::SyncExecFileToNode => 4002,
            Error::UserNotPermission => 5001,
            Error::JobUseCurrentNode(_) => 6001,
            Error::Database(_) | Error::Io(_) | Error::Internal(_) => 9001,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Params(_)
                | Error::CronExprParse { .. }
                | Error::UnsupportedExecType(_)
                | Error::MissingFileRef
                | Error::InvalidAddress(_)
                | Error::InvalidFileName(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
