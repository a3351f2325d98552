use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing value for argument: {flag}")]
    MissingValue { flag: String },
    #[error("missing required argument: {field}")]
    MissingRequired { field: String },
    #[error("invalid value for {flag}={value}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },
    #[error("unsupported argument: {arg}")]
    UnsupportedArgument { arg: String },
    #[error("parse error: {message}")]
    ParseError { message: String },
    #[error("invalid argument: {message}")]
    Argument { message: String },
    #[error("file access error for {path}: {message}")]
    FileAccess { path: String, message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
    #[error("{failed} of {total} chunks failed: {first}")]
    ChunksFailed {
        failed: usize,
        total: usize,
        first: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument {
            message: message.into(),
        }
    }

    pub fn file_access(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::FileAccess {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn chunk_failure_message_names_first_error() {
        let error = AppError::ChunksFailed {
            failed: 2,
            total: 8,
            first: "file access error for x.bam: missing index".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "2 of 8 chunks failed: file access error for x.bam: missing index"
        );
    }

    #[test]
    fn argument_helper_formats_message() {
        let error = AppError::argument("Cutoff cannot be bigger than 255!");
        assert_eq!(
            error.to_string(),
            "invalid argument: Cutoff cannot be bigger than 255!"
        );
    }
}
