use crate::types::SourceSpan;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct MatrixError {
    pub code: String,
    pub message: String,
    pub span: Option<SourceSpan>,
}

impl MatrixError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(
        code: impl Into<String>,
        message: impl Into<String>,
        span: SourceSpan,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            span: Some(span),
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;
    use crate::types::SourceLocation;

    #[test]
    fn display_prefixes_code() {
        let error = MatrixError::new("DICT_NOT_FOUND", "Dictionary \"FIX\" not found.");
        assert_eq!(error.to_string(), "DICT_NOT_FOUND: Dictionary \"FIX\" not found.");
        assert!(error.span.is_none());

        let spanned = MatrixError::with_span(
            "MATRIX_PARSE_ERROR",
            "bad",
            SourceSpan::at(SourceLocation { line: 3, column: 7 }),
        );
        assert_eq!(spanned.span.expect("span").start.line, 3);
    }
}
