//! Incremental delimiter scanner.
//!
//! Headers have no length prefix, so the reader pulls one byte at a time and
//! feeds it to a KMP matcher per candidate token. The scan stops on the first
//! byte that completes any token, which means the stream is never read past
//! the end of the header. Bytes scanned are bounded by `limit`.

use std::io::{ErrorKind, Read};

use crate::error::{FileCipherError, Result};

/// Partial-match state for one token.
struct Matcher<'t> {
    token: &'t [u8],
    failure: Vec<usize>,
    matched: usize,
}

impl<'t> Matcher<'t> {
    fn new(token: &'t [u8]) -> Self {
        debug_assert!(!token.is_empty(), "scanner tokens must be non-empty");
        let mut failure = vec![0usize; token.len()];
        let mut k = 0;
        for i in 1..token.len() {
            while k > 0 && token[i] != token[k] {
                k = failure[k - 1];
            }
            if token[i] == token[k] {
                k += 1;
            }
            failure[i] = k;
        }
        Matcher {
            token,
            failure,
            matched: 0,
        }
    }

    /// Advance by one byte; true when the token has just completed.
    fn push(&mut self, byte: u8) -> bool {
        while self.matched > 0 && self.token[self.matched] != byte {
            self.matched = self.failure[self.matched - 1];
        }
        if self.token[self.matched] == byte {
            self.matched += 1;
        }
        if self.matched == self.token.len() {
            self.matched = 0;
            return true;
        }
        false
    }
}

/// Bytes preceding a delimiter, with the delimiter stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scanned {
    pub bytes: Vec<u8>,
    /// Index of the token that matched
    pub token: usize,
}

pub struct TokenScanner<'t> {
    matchers: Vec<Matcher<'t>>,
    limit: usize,
    context: &'static str,
}

impl<'t> TokenScanner<'t> {
    /// `limit` bounds the bytes consumed, delimiter included. `context` names
    /// what is being scanned in `UnexpectedEof` errors.
    pub fn new(tokens: &[&'t [u8]], limit: usize, context: &'static str) -> Self {
        TokenScanner {
            matchers: tokens.iter().copied().map(Matcher::new).collect(),
            limit,
            context,
        }
    }

    /// Scan until a token matches.
    ///
    /// Returns `Ok(None)` when the stream is already at EOF, `UnexpectedEof`
    /// when it ends part-way, and `NoHeaderFound` when `limit` bytes pass
    /// without a match.
    pub fn scan<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Option<Scanned>> {
        for m in &mut self.matchers {
            m.matched = 0;
        }

        let mut consumed = Vec::new();
        while let Some(byte) = read_byte(reader)? {
            consumed.push(byte);
            for (index, m) in self.matchers.iter_mut().enumerate() {
                if m.push(byte) {
                    let len = consumed.len() - m.token.len();
                    consumed.truncate(len);
                    return Ok(Some(Scanned {
                        bytes: consumed,
                        token: index,
                    }));
                }
            }
            if consumed.len() >= self.limit {
                return Err(FileCipherError::NoHeaderFound { limit: self.limit });
            }
        }

        if consumed.is_empty() {
            Ok(None)
        } else {
            Err(FileCipherError::UnexpectedEof {
                context: self.context,
            })
        }
    }
}

/// Position just past the first occurrence of any token in `haystack`.
pub fn find_token(haystack: &[u8], tokens: &[&[u8]]) -> Option<usize> {
    let mut matchers: Vec<Matcher<'_>> = tokens.iter().copied().map(Matcher::new).collect();
    for (pos, &byte) in haystack.iter().enumerate() {
        if matchers.iter_mut().any(|m| m.push(byte)) {
            return Some(pos + 1);
        }
    }
    None
}

fn read_byte<R: Read + ?Sized>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
