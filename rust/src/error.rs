use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::CipherError;
use crate::forms::FormExportError;
use crate::mechanisms::MechanismError;
use crate::platform::PlatformError;
use crate::servers::ServerError;
use crate::view::ViewError;

/// Top-level error for the command-line front end.
#[derive(Debug, Error)]
pub enum FluigError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Mechanism(#[from] MechanismError),
    #[error(transparent)]
    FormExport(#[from] FormExportError),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
