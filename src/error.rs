use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML deserialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("Element '{selector}' not found on {url}")]
    ElementMissing { selector: String, url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Giving up on {what} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        last_error: String,
    },
}

impl ScraperError {
    /// Transport failures, throttling, server errors and pages that did not
    /// render the expected element are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScraperError::Http(e) => !e.is_builder() && !e.is_redirect(),
            ScraperError::Status { status, .. } => *status == 429 || *status >= 500,
            ScraperError::ElementMissing { .. } => true,
            _ => false,
        }
    }

    /// Network-level failures. A crawl that hits one cannot be trusted to
    /// be complete, unlike a single page that failed to parse.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            ScraperError::Http(_)
                | ScraperError::Status { .. }
                | ScraperError::RetriesExhausted { .. }
                | ScraperError::Io(_)
        )
    }

    pub fn parse(message: impl Into<String>) -> Self {
        ScraperError::Parse(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
