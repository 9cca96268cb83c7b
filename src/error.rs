use thiserror::Error;

/// Errors raised by the fitting library.
#[derive(Debug, Error)]
pub enum FitError {
    /// Every missing required field of one configuration block, reported together.
    #[error("Missing tags in {context}:{}", format_tags(.fields))]
    MissingFields { context: String, fields: Vec<String> },

    #[error("Unknown model '{name}'. Valid models: {}", .valid.join(", "))]
    UnknownModel { name: String, valid: Vec<String> },

    #[error("Unknown parameter '{name}' for model {model}. Valid parameters: {}", .valid.join(", "))]
    UnknownParameter {
        model: String,
        name: String,
        valid: Vec<String>,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Optimization failed: {0}")]
    Optimization(String),

    #[error("Sampler error: {0}")]
    Sampler(String),

    #[error("Table error: {0}")]
    Table(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn format_tags(fields: &[String]) -> String {
    fields.iter().map(|f| format!(" <{f}>")).collect()
}

impl FitError {
    /// Process exit code used by the `tack` binary for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::MissingFields { .. }
            | FitError::UnknownModel { .. }
            | FitError::UnknownParameter { .. }
            | FitError::Json(_) => 2,
            FitError::InvalidData(_) | FitError::Table(_) | FitError::Io(_) => 3,
            FitError::Optimization(_) | FitError::Sampler(_) => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
