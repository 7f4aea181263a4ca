use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out of range input: bad Y index, non finite realization,
    /// null number of Y random variables...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The X, Y0..Yn-1, X, ... insertion scheme was broken.
    #[error("insertion sequence violated: {0}")]
    Sequence(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("cannot load {}{}: {reason}", .path.display(), .line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    Load {
        path: PathBuf,
        line: Option<usize>,
        reason: String,
    },

    #[error("DES functional test failed")]
    SelfTest,
}

impl Error {
    pub(crate) fn load(path: impl Into<PathBuf>, line: Option<usize>, reason: impl ToString) -> Self {
        Error::Load {
            path: path.into(),
            line,
            reason: reason.to_string(),
        }
    }
}
