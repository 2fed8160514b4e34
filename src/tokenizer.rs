//! Whitespace separated integer tokenizer.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::num::ParseIntError;

use crate::Record;

/// Tokenizing error.
#[derive(Debug)]
pub enum TokenizeError {
    /// Input stream read error.
    IO(io::Error),
    /// Token is not a valid integer.
    InvalidToken {
        token: String,
        line: u64,
        source: ParseIntError,
    },
}

impl Error for TokenizeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            TokenizeError::IO(err) => err,
            TokenizeError::InvalidToken { source, .. } => source,
        })
    }
}

impl Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            TokenizeError::IO(err) => write!(f, "input stream read failed: {}", err),
            TokenizeError::InvalidToken { token, line, source } => {
                write!(f, "invalid integer '{}' at line {}: {}", token, line, source)
            }
        }
    }
}

impl From<io::Error> for TokenizeError {
    fn from(err: io::Error) -> Self {
        TokenizeError::IO(err)
    }
}

/// Pulls integers one at a time out of a text stream.
/// Values may be separated by any amount of whitespace, including line breaks, so the layout
/// of the values across lines does not matter.
pub struct Tokenizer<R> {
    reader: R,
    /// Current line. Tokens before `pos` are already consumed.
    line: String,
    pos: usize,
    line_number: u64,
}

impl<R: io::BufRead> Tokenizer<R> {
    /// Creates a tokenizer reading from `reader`.
    pub fn new(reader: R) -> Self {
        Tokenizer {
            reader,
            line: String::new(),
            pos: 0,
            line_number: 0,
        }
    }

    /// Returns the next integer of the stream or `None` once the stream is exhausted.
    pub fn next_int(&mut self) -> Result<Option<Record>, TokenizeError> {
        loop {
            if let Some((start, end)) = self.next_token() {
                let token = &self.line[start..end];
                let value = token.parse::<Record>().map_err(|err| TokenizeError::InvalidToken {
                    token: token.to_owned(),
                    line: self.line_number,
                    source: err,
                })?;
                return Ok(Some(value));
            }

            self.line.clear();
            self.pos = 0;
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
        }
    }

    /// Returns the byte range of the next unconsumed token of the current line.
    fn next_token(&mut self) -> Option<(usize, usize)> {
        let rest = &self.line[self.pos..];
        let start = rest.find(|c: char| !c.is_whitespace())?;
        let len = rest[start..]
            .find(char::is_whitespace)
            .unwrap_or(rest.len() - start);

        let token_start = self.pos + start;
        self.pos = token_start + len;

        return Some((token_start, self.pos));
    }
}

impl<R: io::BufRead> Iterator for Tokenizer<R> {
    type Item = Result<Record, TokenizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_int().transpose()
    }
}
