use loomgate_common::Error;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("registry error: {0}")]
    Registry(#[from] loomgate_registry::RegistryError),
}

impl From<RouterError> for Error {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::Registry(inner) => inner.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
