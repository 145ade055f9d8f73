//! Error types for building an autofill session.
//!
//! Only construction can fail. A branch of the search that runs out of candidates is a normal
//! outcome and is reported through the search's return values, never through this type.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AutofillError {
    #[error("template has {actual} cells but a {width}x{height} grid needs {expected}")]
    TemplateDimensions {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    #[error("template cell {index} is empty (use \" \" for an open cell)")]
    EmptyCell { index: usize },

    #[error("template row {row} has {actual} cells, expected {expected}")]
    RaggedTemplate {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("unterminated rebus cell in template row {row}")]
    UnterminatedRebus { row: usize },

    #[error("word index is empty")]
    EmptyWordIndex,

    #[error("word list line {line}: invalid score \"{score}\"")]
    InvalidScore { line: usize, score: String },

    #[error("could not read word list: {0}")]
    Io(#[from] io::Error),
}

impl AutofillError {
    /// True for errors caused by the grid template rather than the word list.
    #[must_use]
    pub fn is_template_error(&self) -> bool {
        matches!(
            self,
            AutofillError::TemplateDimensions { .. }
                | AutofillError::EmptyCell { .. }
                | AutofillError::RaggedTemplate { .. }
                | AutofillError::UnterminatedRebus { .. }
        )
    }
}
