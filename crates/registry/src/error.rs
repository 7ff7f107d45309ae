use loomgate_common::Error;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("server request not found: {0}")]
    RequestNotFound(String),

    #[error("owner {owner} already has {max} active entities")]
    TooManyActiveEntities { owner: String, max: u32 },

    #[error("invalid api key")]
    InvalidApiKey,

    #[error("crypto error: {0}")]
    Crypto(#[from] loomgate_crypto::CryptoError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::EntityNotFound(_) | RegistryError::RequestNotFound(_) => {
                Error::NotFound(e.to_string())
            },
            RegistryError::TooManyActiveEntities { .. } | RegistryError::InvalidApiKey => {
                Error::Forbidden(e.to_string())
            },
            RegistryError::Crypto(_) | RegistryError::Database(_) | RegistryError::Json(_) => {
                Error::Transient(e.to_string())
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
