use thiserror::Error;

/// Failures raised while fetching, formatting or delivering outliers.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, NotifierError>;
