//! Reading the element count the way `scanf("%u", ...)` does.
//!
//! Input is consumed byte by byte, so nothing has to be valid UTF-8 and no
//! line is ever held in memory. Leading whitespace (newlines included) is
//! skipped, an optional sign is accepted, and digits are consumed up to the
//! first non-digit, which is left unread. A negative value is negated in
//! 64-bit unsigned arithmetic and a value too large for 64 bits saturates;
//! either way the result is then truncated to 32 bits, so `-1` reads as
//! `4294967295` and `4294967300` reads as `4`.

use std::io::{self, BufRead};

use thiserror::Error;

/// Longest offending word echoed back in [`InputError::NotANumber`]
const MAX_WORD: usize = 32;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("no input")]
    Eof,
    #[error("expected an unsigned integer, found `{0}`")]
    NotANumber(String),
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
}

fn peek<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    Ok(reader.fill_buf()?.first().copied())
}

/// Read one unsigned integer from `reader`
pub fn scan_u32<R: BufRead>(reader: &mut R) -> Result<u32, InputError> {
    loop {
        match peek(reader)? {
            None => return Err(InputError::Eof),
            Some(b) if b.is_ascii_whitespace() => reader.consume(1),
            Some(_) => break,
        }
    }

    let sign = match peek(reader)? {
        Some(b @ (b'-' | b'+')) => {
            reader.consume(1);
            Some(b)
        }
        _ => None,
    };

    let mut value = Some(0u64);
    let mut digits = 0usize;
    while let Some(b) = peek(reader)? {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.and_then(|v| v.checked_mul(10)?.checked_add(u64::from(b - b'0')));
        digits += 1;
        reader.consume(1);
    }

    if digits == 0 {
        let mut word: Vec<u8> = sign.into_iter().collect();
        while word.len() < MAX_WORD {
            match peek(reader)? {
                Some(b) if !b.is_ascii_whitespace() => {
                    word.push(b);
                    reader.consume(1);
                }
                _ => break,
            }
        }
        return Err(InputError::NotANumber(
            String::from_utf8_lossy(&word).into_owned(),
        ));
    }

    let value = match value {
        Some(v) if sign == Some(b'-') => v.wrapping_neg(),
        Some(v) => v,
        None => u64::MAX,
    };
    Ok(value as u32)
}
