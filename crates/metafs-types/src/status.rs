use std::fmt;

use crate::status_code::{self, status_code_t, StatusCode};

/// A status value: a numeric code plus an optional message.
///
/// Used as the error side of [`crate::Result`] everywhere below the
/// filesystem-call adapter. `#[must_use]` keeps error statuses from being
/// dropped silently.
#[derive(Debug, Clone)]
#[must_use]
pub struct Status {
    code: status_code_t,
    message: Option<String>,
}

impl Status {
    pub fn new(code: status_code_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: status_code_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    pub fn code(&self) -> status_code_t {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// Render as `"Kv::NotFound(1000) some detail"`.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<status_code_t> for Status {
    fn from(code: status_code_t) -> Self {
        Self::new(code)
    }
}
