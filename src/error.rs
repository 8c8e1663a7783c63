use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fetch failed for {site}: {message}")]
    Fetch { site: String, message: String },

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("alert dispatch failed: {0}")]
    Dispatch(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_names_the_site() {
        let err = MonitorError::Fetch {
            site: "example".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "fetch failed for example: connection refused");
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MonitorError = io_err.into();
        assert!(matches!(err, MonitorError::Io(_)));
    }
}
