use loomgate_common::Error;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no encryption key held for entity {0}")]
    KeyMissing(String),

    #[error("failed to decrypt queued message: {0}")]
    DecryptFailed(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] loomgate_crypto::CryptoError),
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        match e {
            BusError::KeyMissing(entity) => Error::KeyMissing(entity),
            BusError::DecryptFailed(reason) => Error::DecryptFailed(reason),
            BusError::Crypto(inner) => Error::Transient(inner.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
