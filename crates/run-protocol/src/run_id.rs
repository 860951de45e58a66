use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const MAX_RUN_ID_LEN: usize = 128;

static RUN_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("run id pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunIdError {
    #[error("run id must not be empty")]
    Empty,
    #[error("run id must be at most {max} characters (got {len})")]
    TooLong { len: usize, max: usize },
    #[error("run id '{run_id}' must only contain letters, digits, '_', '-' or '.'")]
    InvalidCharacters { run_id: String },
    #[error("run id '{run_id}' cannot be a relative path component")]
    RelativeComponent { run_id: String },
}

/// Run ids name directories on the supervisor side, so they must stay a
/// single safe path component.
pub fn validate_run_id(run_id: &str) -> Result<(), RunIdError> {
    if run_id.is_empty() {
        return Err(RunIdError::Empty);
    }
    if run_id.len() > MAX_RUN_ID_LEN {
        return Err(RunIdError::TooLong {
            len: run_id.len(),
            max: MAX_RUN_ID_LEN,
        });
    }
    if run_id == "." || run_id == ".." {
        return Err(RunIdError::RelativeComponent {
            run_id: run_id.to_string(),
        });
    }
    if !RUN_ID_PATTERN.is_match(run_id) {
        return Err(RunIdError::InvalidCharacters {
            run_id: run_id.to_string(),
        });
    }
    Ok(())
}
