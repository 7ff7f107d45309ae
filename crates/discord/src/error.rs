use loomgate_common::Error;

#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("webhook access forbidden in channel {0}")]
    Forbidden(String),

    #[error("no webhook available for channel {0}")]
    NotFound(String),
}

impl From<DiscordError> for Error {
    fn from(e: DiscordError) -> Self {
        match e {
            DiscordError::Forbidden(_) => Error::Forbidden(e.to_string()),
            DiscordError::NotFound(_) => Error::NotFound(e.to_string()),
            DiscordError::Serenity(_) => Error::Transient(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscordError>;
