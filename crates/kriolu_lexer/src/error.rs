use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("[line {line}] Error: Unexpected character '{ch}'.")]
    UnexpectedCharacter { ch: char, line: u32 },

    #[error("[line {line}] Error: Unterminated string.")]
    UnterminatedString { line: u32 },

    #[error("[line {line}] Error: Invalid number '{raw}'.")]
    InvalidNumber { raw: String, line: u32 },
}

impl LexError {
    pub fn line(&self) -> u32 {
        match self {
            LexError::UnexpectedCharacter { line, .. } => *line,
            LexError::UnterminatedString { line }      => *line,
            LexError::InvalidNumber { line, .. }       => *line,
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;
