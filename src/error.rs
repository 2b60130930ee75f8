use crate::config::ConfigError;
use crate::dictionary::DictionaryError;
use crate::frame::FrameError;
use crate::pose::PoseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Pose(#[from] PoseError),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid camera intrinsics: {0}")]
    Intrinsics(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
