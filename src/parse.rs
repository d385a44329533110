use atoi::{FromRadix10Checked, FromRadix10SignedChecked};
use thiserror::Error;

/// Utility for parsing a command line
///
/// A command line is split on ASCII whitespace into "fields". The first field
/// is the verb. A `Parse` is initialized with the line and provides a
/// cursor-like API over the remaining fields. Each command grammar in
/// `command.rs` uses a `Parse` to extract its fields.
#[derive(Debug)]
pub(crate) struct Parse<'a> {
    fields: Vec<&'a str>,
    pos: usize,
}

/// Malformed client input.
///
/// A protocol error is answered with a `CLIENT_ERROR` line and the session
/// continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty line")]
    EmptyLine,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("too few params to command {0:?}")]
    TooFewParams(String),
    #[error("cannot read {field} {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("command line is not valid UTF-8")]
    InvalidUtf8,
    #[error("expected \\r")]
    ExpectedCr,
    #[error("expected \\n")]
    ExpectedLf,
    #[error("bad data chunk")]
    DataTooLarge,
    #[error("line too long")]
    LineTooLong,
}

impl<'a> Parse<'a> {
    /// Create a new `Parse` over the command line, without the terminator.
    pub(crate) fn new(line: &'a [u8]) -> Result<Parse<'a>, ProtocolError> {
        let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Parse {
            fields: line.split_ascii_whitespace().collect(),
            pos: 0,
        })
    }

    /// Total number of fields in the line, including the verb.
    pub(crate) fn len(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Return the next field.
    fn next(&mut self) -> Option<&'a str> {
        let field = self.fields.get(self.pos).copied();
        if field.is_some() {
            self.pos += 1;
        }
        field
    }

    /// Return the next field as a string.
    ///
    /// Callers check the field count up front, so running out here means the
    /// grammar asked for more than it validated.
    pub(crate) fn next_string(&mut self, verb: &str) -> Result<String, ProtocolError> {
        self.next()
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::TooFewParams(verb.to_string()))
    }

    /// Return the next field as a signed 64-bit decimal.
    pub(crate) fn next_i64(&mut self, verb: &str, field: &'static str) -> Result<i64, ProtocolError> {
        let token = self
            .next()
            .ok_or_else(|| ProtocolError::TooFewParams(verb.to_string()))?;
        parse_i64(token).ok_or_else(|| ProtocolError::InvalidNumber {
            field,
            value: token.to_string(),
        })
    }

    /// Return the next field as an unsigned length.
    pub(crate) fn next_usize(&mut self, verb: &str, field: &'static str) -> Result<usize, ProtocolError> {
        let token = self
            .next()
            .ok_or_else(|| ProtocolError::TooFewParams(verb.to_string()))?;
        parse_usize(token).ok_or_else(|| ProtocolError::InvalidNumber {
            field,
            value: token.to_string(),
        })
    }

    /// Consumes the next field if it is exactly `noreply`.
    pub(crate) fn noreply(&mut self) -> bool {
        if self.fields.get(self.pos) == Some(&"noreply") {
            self.pos += 1;
            return true;
        }
        false
    }

    /// All fields not consumed yet.
    pub(crate) fn rest(&mut self) -> Vec<String> {
        let rest = self.fields[self.pos..].iter().map(|s| s.to_string()).collect();
        self.pos = self.fields.len();
        rest
    }

    /// Checks if there is more in the line
    pub(crate) fn complete(&self) -> bool {
        self.pos >= self.fields.len()
    }
}

fn has_digit(token: &[u8]) -> bool {
    token.iter().any(|b| b.is_ascii_digit())
}

fn parse_i64(token: &str) -> Option<i64> {
    let bytes = token.as_bytes();
    match i64::from_radix_10_signed_checked(bytes) {
        (Some(n), used) if used == bytes.len() && has_digit(bytes) => Some(n),
        _ => None,
    }
}

fn parse_usize(token: &str) -> Option<usize> {
    let bytes = token.as_bytes();
    match usize::from_radix_10_checked(bytes) {
        (Some(n), used) if used == bytes.len() && has_digit(bytes) => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_collapse_whitespace() {
        let parse = Parse::new(b"get  a \t bb   c").unwrap();
        assert_eq!(parse.len(), 4);
    }

    #[test]
    fn test_next_string_runs_out() {
        let mut parse = Parse::new(b"get").unwrap();
        assert_eq!(parse.next_string("get").unwrap(), "get");
        assert_eq!(
            parse.next_string("get"),
            Err(ProtocolError::TooFewParams("get".to_string()))
        );
    }

    #[test]
    fn test_numbers() {
        let mut parse = Parse::new(b"-5 42 12ab -").unwrap();
        assert_eq!(parse.next_i64("incr", "value").unwrap(), -5);
        assert_eq!(parse.next_usize("set", "bytes").unwrap(), 42);
        assert_eq!(
            parse.next_i64("incr", "value"),
            Err(ProtocolError::InvalidNumber {
                field: "value",
                value: "12ab".to_string()
            })
        );
        assert!(parse.next_i64("incr", "value").is_err());
    }

    #[test]
    fn test_usize_rejects_sign_and_overflow() {
        assert_eq!(parse_usize("-1"), None);
        assert_eq!(parse_usize("99999999999999999999999"), None);
        assert_eq!(parse_i64("9223372036854775808"), None);
        assert_eq!(parse_i64("9223372036854775807"), Some(i64::MAX));
    }

    #[test]
    fn test_noreply_only_exact_literal() {
        let mut parse = Parse::new(b"NOREPLY noreply").unwrap();
        assert!(!parse.noreply());
        assert_eq!(parse.next_string("x").unwrap(), "NOREPLY");
        assert!(parse.noreply());
        assert!(parse.complete());
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(Parse::new(b"get \xff").unwrap_err(), ProtocolError::InvalidUtf8);
    }
}
