use thiserror::Error;

pub type CloakResult<T> = Result<T, CloakError>;

#[derive(Debug, Error)]
pub enum CloakError {
    /// Algorithm or provider misconfiguration. Never retried.
    #[error("crypto provider error: {0}")]
    CryptoProvider(String),

    /// Ciphertext, header, or compressed stream did not decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// Disallowed characters in a file name; raised before any crypto work.
    #[error("invalid file name: {0}")]
    Validation(String),

    /// A config record was found on disk but no rotated passphrase opened it.
    #[error("config record {key}: every rotated passphrase failed")]
    RotationExhausted {
        key: String,
        #[source]
        source: Box<CloakError>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CloakError {
    /// True for failures that mean "this ciphertext is not ours / is damaged",
    /// as opposed to environment problems.
    pub fn is_decode(&self) -> bool {
        matches!(self, CloakError::Decode(_))
    }
}
