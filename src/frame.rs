use crate::parse::ProtocolError;
use bytes::{Buf, Bytes};
use std::io::Cursor;
use thiserror::Error;

/// Error returned while decoding a request from a partially filled buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough data is available to parse a request
    #[error("incomplete request")]
    Incomplete,
    /// The buffered bytes can never form a valid request
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Longest command line accepted, terminator excluded.
pub(crate) const MAX_LINE_LEN: usize = 16 * 1024;

/// Returns the next line without its terminator.
///
/// A line ends at `\n`; a single `\r` right before it is stripped as well. On
/// success the cursor is moved *after* the `\n`.
///
/// A line longer than [`MAX_LINE_LEN`] is rejected with `LineTooLong`. The
/// cursor is then moved past the `\n`, or to the end of the buffer when the
/// line has not ended yet; in that case the caller has to drop input up to
/// the next `\n` itself.
pub(crate) fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], FrameError> {
    let start = src.position() as usize;
    let buf: &'a [u8] = src.get_ref();
    let rest = buf.get(start..).unwrap_or_default();

    // the `\r` of a CRLF may sit right after the limit
    let window = &rest[..rest.len().min(MAX_LINE_LEN + 2)];
    match window.iter().position(|&b| b == b'\n') {
        Some(offset) => {
            let end = start + offset;
            src.set_position((end + 1) as u64);

            let line = &buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.len() > MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong.into());
            }
            Ok(line)
        }
        None if rest.len() > MAX_LINE_LEN + 1 => {
            let end = rest
                .iter()
                .position(|&b| b == b'\n')
                .map_or(buf.len(), |offset| start + offset + 1);
            src.set_position(end as u64);
            Err(ProtocolError::LineTooLong.into())
        }
        None => Err(FrameError::Incomplete),
    }
}

/// Reads exactly `len` payload bytes followed by the mandatory `\r\n`.
///
/// Both terminator bytes are consumed before either is checked. When they
/// do not match, the cursor is still moved past the payload and both
/// terminator positions so the caller can drop the broken block. Unlike a
/// byte-at-a-time reader, which stops right after a bad `\r`, this also drops
/// the byte following it.
pub(crate) fn get_payload(src: &mut Cursor<&[u8]>, len: usize) -> Result<Bytes, FrameError> {
    let needed = len.checked_add(2).ok_or(ProtocolError::DataTooLarge)?;
    if src.remaining() < needed {
        return Err(FrameError::Incomplete);
    }

    let start = src.position() as usize;
    let data = Bytes::copy_from_slice(&src.get_ref()[start..start + len]);
    src.advance(len);

    let cr = src.get_u8();
    let lf = src.get_u8();
    if cr != b'\r' {
        return Err(ProtocolError::ExpectedCr.into());
    }
    if lf != b'\n' {
        return Err(ProtocolError::ExpectedLf.into());
    }

    Ok(data)
}
