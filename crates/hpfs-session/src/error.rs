use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("'{0}' is a reserved session name")]
    ReservedName(String),

    #[error("session '{0}' already exists")]
    AlreadyExists(String),

    #[error("no such session '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Hpfs(#[from] hpfs_log::HpfsError),
}
