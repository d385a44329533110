use crate::frame::{get_line, get_payload, FrameError};
use crate::parse::{Parse, ProtocolError};
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest exptime still read as a delta from now (30 days, in seconds).
pub const REALTIME_MAX_DELTA: i64 = 60 * 60 * 24 * 30;

/// The fixed command vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
    Delete,
    Get,
    Gets,
    Incr,
    Decr,
    Touch,
    FlushAll,
    Version,
    Quit,
    Stats,
}

impl Verb {
    pub const ALL: [Verb; 16] = [
        Verb::Set,
        Verb::Add,
        Verb::Replace,
        Verb::Append,
        Verb::Prepend,
        Verb::Cas,
        Verb::Delete,
        Verb::Get,
        Verb::Gets,
        Verb::Incr,
        Verb::Decr,
        Verb::Touch,
        Verb::FlushAll,
        Verb::Version,
        Verb::Quit,
        Verb::Stats,
    ];

    /// Returns the command name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Set => "set",
            Verb::Add => "add",
            Verb::Replace => "replace",
            Verb::Append => "append",
            Verb::Prepend => "prepend",
            Verb::Cas => "cas",
            Verb::Delete => "delete",
            Verb::Get => "get",
            Verb::Gets => "gets",
            Verb::Incr => "incr",
            Verb::Decr => "decr",
            Verb::Touch => "touch",
            Verb::FlushAll => "flush_all",
            Verb::Version => "version",
            Verb::Quit => "quit",
            Verb::Stats => "stats",
        }
    }

    /// Storage commands carry a data block after the command line.
    /// These commands are "set", "add", "replace", "append", "prepend", or "cas"
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Verb::Set | Verb::Add | Verb::Replace | Verb::Append | Verb::Prepend | Verb::Cas
        )
    }
}

impl FromStr for Verb {
    type Err = ProtocolError;

    fn from_str(name: &str) -> Result<Verb, ProtocolError> {
        Verb::ALL
            .iter()
            .find(|verb| verb.as_str() == name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request.
///
/// Fields that mean nothing to a given verb keep their zero value. `exptime`
/// is always either 0 or an absolute unix time in seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub key: String,
    pub keys: Vec<String>,
    pub flags: String,
    pub exptime: i64,
    pub data: Bytes,
    pub delta: i64,
    pub cas: String,
    pub noreply: bool,
}

impl Command {
    /// Create an empty `Command` for `verb`.
    pub fn new(verb: Verb) -> Command {
        Command {
            verb,
            key: String::new(),
            keys: Vec::new(),
            flags: String::new(),
            exptime: 0,
            data: Bytes::new(),
            delta: 0,
            cas: String::new(),
            noreply: false,
        }
    }

    /// Parse one request from the buffered bytes in `src`, using the system
    /// clock for exptime normalization.
    pub fn parse_frame(src: &mut Cursor<&[u8]>) -> Result<Command, FrameError> {
        Command::parse_frame_at(src, unix_now())
    }

    /// Parse one request from `src` with `now` as the current unix time.
    ///
    /// # Returns
    ///
    /// On success the cursor sits right after the request. `Incomplete` means
    /// more bytes are needed and the cursor position is meaningless. On a
    /// protocol error the cursor sits after the bytes that should be dropped:
    /// the command line, plus the data block when only its terminator was bad.
    pub fn parse_frame_at(src: &mut Cursor<&[u8]>, now: i64) -> Result<Command, FrameError> {
        let line = get_line(src)?;
        let mut parse = Parse::new(line)?;
        if parse.is_empty() {
            return Err(ProtocolError::EmptyLine.into());
        }

        let name = parse.next_string("")?;
        let verb: Verb = name.parse()?;
        let mut command = Command::new(verb);

        match verb {
            Verb::Set | Verb::Add | Verb::Replace | Verb::Append | Verb::Prepend => {
                // <command name> <key> <flags> <exptime> <bytes> [noreply]\r\n
                // <data block>\r\n
                require(&parse, 5, verb)?;
                let len = command.parse_storage_header(&mut parse, now)?;
                command.noreply = parse.noreply();
                command.data = get_payload(src, len)?;
            }
            Verb::Cas => {
                // cas <key> <flags> <exptime> <bytes> <cas unique> [noreply]\r\n
                // <data block>\r\n
                require(&parse, 6, verb)?;
                let len = command.parse_storage_header(&mut parse, now)?;
                command.cas = parse.next_string(verb.as_str())?;
                command.noreply = parse.noreply();
                command.data = get_payload(src, len)?;
            }
            Verb::Delete => {
                // delete <key> [noreply]\r\n
                //
                // Every trailing field is kept as a key, "noreply" included.
                require(&parse, 2, verb)?;
                command.keys = parse.rest();
                command.noreply = command.keys.get(1).map(String::as_str) == Some("noreply");
            }
            Verb::Get | Verb::Gets => {
                // get <key>*\r\n
                require(&parse, 2, verb)?;
                command.keys = parse.rest();
            }
            Verb::Incr | Verb::Decr => {
                // incr <key> <value> [noreply]\r\n
                require(&parse, 3, verb)?;
                command.key = parse.next_string(verb.as_str())?;
                command.delta = parse.next_i64(verb.as_str(), "value")?;
                command.noreply = parse.noreply();
            }
            Verb::Touch => {
                // touch <key> <exptime> [noreply]\r\n
                require(&parse, 3, verb)?;
                command.key = parse.next_string(verb.as_str())?;
                let exptime = parse.next_i64(verb.as_str(), "exptime")?;
                command.exptime = normalize_exptime(exptime, now);
                command.noreply = parse.noreply();
            }
            Verb::FlushAll => {
                // flush_all [delay]\r\n
                if !parse.complete() {
                    let delay = parse.next_i64(verb.as_str(), "delay")?;
                    command.exptime = normalize_exptime(delay, now);
                }
            }
            Verb::Version | Verb::Quit => {}
            Verb::Stats => {
                // stats <args>*\r\n
                command.keys = parse.rest();
            }
        }

        Ok(command)
    }

    /// Reads `<key> <flags> <exptime> <bytes>` and returns the declared length.
    fn parse_storage_header(&mut self, parse: &mut Parse<'_>, now: i64) -> Result<usize, ProtocolError> {
        let verb = self.verb.as_str();
        self.key = parse.next_string(verb)?;
        self.flags = parse.next_string(verb)?;
        let exptime = parse.next_i64(verb, "exptime")?;
        self.exptime = normalize_exptime(exptime, now);
        parse.next_usize(verb, "bytes")
    }
}

fn require(parse: &Parse<'_>, fields: usize, verb: Verb) -> Result<(), ProtocolError> {
    if parse.len() < fields {
        return Err(ProtocolError::TooFewParams(verb.as_str().to_string()));
    }
    Ok(())
}

/// Turns a relative exptime into an absolute unix time.
///
/// 0 means "never expires" and values above [`REALTIME_MAX_DELTA`] are
/// already absolute; both pass through untouched.
pub fn normalize_exptime(exptime: i64, now: i64) -> i64 {
    if exptime > 0 && exptime <= REALTIME_MAX_DELTA {
        return now.saturating_add(exptime);
    }
    exptime
}

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn parse(input: &[u8]) -> Result<Command, FrameError> {
        Command::parse_frame_at(&mut Cursor::new(input), NOW)
    }

    #[test]
    fn test_set() {
        let command = parse(b"set KEY 0 0 10\r\n1234567890\r\n").unwrap();
        assert_eq!(command.verb, Verb::Set);
        assert_eq!(command.key, "KEY");
        assert_eq!(command.flags, "0");
        assert_eq!(command.exptime, 0);
        assert_eq!(&command.data[..], b"1234567890");
        assert!(!command.noreply);
    }

    #[test]
    fn test_storage_family_noreply() {
        for verb in ["set", "add", "replace", "append", "prepend"] {
            let input = format!("{verb} k 42 0 3 noreply\r\nabc\r\n");
            let command = parse(input.as_bytes()).unwrap();
            assert_eq!(command.verb.as_str(), verb);
            assert_eq!(command.flags, "42");
            assert!(command.noreply);
        }
    }

    #[test]
    fn test_get() {
        let command = parse(b"get a bb c\r\n").unwrap();
        assert_eq!(command.verb, Verb::Get);
        assert_eq!(command.keys, vec!["a", "bb", "c"]);
        assert!(command.data.is_empty());
    }

    #[test]
    fn test_gets_requires_key() {
        assert_eq!(
            parse(b"gets\r\n"),
            Err(FrameError::Protocol(ProtocolError::TooFewParams("gets".to_string())))
        );
    }

    #[test]
    fn test_cas() {
        let command = parse(b"cas KEY 0 0 10 UNIQ\r\n1234567890\r\n").unwrap();
        assert_eq!(command.verb, Verb::Cas);
        assert_eq!(command.key, "KEY");
        assert_eq!(command.flags, "0");
        assert_eq!(command.exptime, 0);
        assert_eq!(command.cas, "UNIQ");
        assert_eq!(&command.data[..], b"1234567890");
    }

    #[test]
    fn test_cas_needs_token() {
        assert!(matches!(
            parse(b"cas KEY 0 0 10\r\n1234567890\r\n"),
            Err(FrameError::Protocol(ProtocolError::TooFewParams(_)))
        ));
    }

    #[test]
    fn test_unknown_verb_does_not_read_payload() {
        let input = b"xxx KEY 0 0 10\r\n1234567890\r\n";
        let mut src = Cursor::new(&input[..]);
        assert_eq!(
            Command::parse_frame_at(&mut src, NOW),
            Err(FrameError::Protocol(ProtocolError::UnknownCommand("xxx".to_string())))
        );
        // only the command line was consumed
        assert_eq!(src.position(), 16);
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(parse(b"  \r\n"), Err(FrameError::Protocol(ProtocolError::EmptyLine)));
    }

    #[test]
    fn test_zero_length_payload() {
        let command = parse(b"set k 0 0 0\r\n\r\n").unwrap();
        assert!(command.data.is_empty());
    }

    #[test]
    fn test_payload_with_bad_terminator() {
        assert_eq!(
            parse(b"set k 0 0 3\r\nabcde\r\n"),
            Err(FrameError::Protocol(ProtocolError::ExpectedCr))
        );
        assert_eq!(
            parse(b"set k 0 0 3\r\nabc\rX"),
            Err(FrameError::Protocol(ProtocolError::ExpectedLf))
        );
    }

    #[test]
    fn test_payload_may_contain_crlf() {
        let command = parse(b"set k 0 0 4\r\n\r\n\r\n\r\n").unwrap();
        assert_eq!(&command.data[..], b"\r\n\r\n");
    }

    #[test]
    fn test_incomplete_payload() {
        assert_eq!(parse(b"set k 0 0 10\r\n12345"), Err(FrameError::Incomplete));
        assert_eq!(parse(b"set k 0 0 10"), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_bad_bytes_field() {
        assert_eq!(
            parse(b"set k 0 0 -1\r\n\r\n"),
            Err(FrameError::Protocol(ProtocolError::InvalidNumber {
                field: "bytes",
                value: "-1".to_string()
            }))
        );
    }

    #[test]
    fn test_relative_exptime_is_made_absolute() {
        let command = parse(b"set k 0 100 1\r\nx\r\n").unwrap();
        assert_eq!(command.exptime, NOW + 100);

        let command = parse(format!("touch k {REALTIME_MAX_DELTA}\r\n").as_bytes()).unwrap();
        assert_eq!(command.exptime, NOW + REALTIME_MAX_DELTA);
    }

    #[test]
    fn test_absolute_exptime_passes_through() {
        let absolute = REALTIME_MAX_DELTA + 1;
        let command = parse(format!("touch k {absolute} noreply\r\n").as_bytes()).unwrap();
        assert_eq!(command.exptime, absolute);
        assert!(command.noreply);

        let command = parse(b"touch k -1\r\n").unwrap();
        assert_eq!(command.exptime, -1);
    }

    #[test]
    fn test_delete() {
        let command = parse(b"delete k\r\n").unwrap();
        assert_eq!(command.keys, vec!["k"]);
        assert!(!command.noreply);

        let command = parse(b"delete k noreply\r\n").unwrap();
        assert_eq!(command.keys, vec!["k", "noreply"]);
        assert!(command.noreply);

        let command = parse(b"delete a b c\r\n").unwrap();
        assert_eq!(command.keys, vec!["a", "b", "c"]);
        assert!(!command.noreply);
    }

    #[test]
    fn test_incr_decr() {
        let command = parse(b"incr n 100\r\n").unwrap();
        assert_eq!(command.verb, Verb::Incr);
        assert_eq!(command.key, "n");
        assert_eq!(command.delta, 100);

        let command = parse(b"decr n -7 noreply\r\n").unwrap();
        assert_eq!(command.delta, -7);
        assert!(command.noreply);

        assert!(matches!(
            parse(b"incr n x\r\n"),
            Err(FrameError::Protocol(ProtocolError::InvalidNumber { field: "value", .. }))
        ));
    }

    #[test]
    fn test_flush_all() {
        assert_eq!(parse(b"flush_all\r\n").unwrap().exptime, 0);
        assert_eq!(parse(b"flush_all 10\r\n").unwrap().exptime, NOW + 10);
    }

    #[test]
    fn test_version_quit_stats() {
        assert_eq!(parse(b"version\r\n").unwrap(), Command::new(Verb::Version));
        assert_eq!(parse(b"quit\r\n").unwrap(), Command::new(Verb::Quit));
        assert!(parse(b"stats\r\n").unwrap().keys.is_empty());
        assert_eq!(parse(b"stats slabs items\r\n").unwrap().keys, vec!["slabs", "items"]);
    }

    #[test]
    fn test_pipelined_requests() {
        let input = b"get a\r\nset b 1 0 2\r\nhi\r\nquit\r\n";
        let mut src = Cursor::new(&input[..]);
        assert_eq!(Command::parse_frame_at(&mut src, NOW).unwrap().verb, Verb::Get);
        assert_eq!(Command::parse_frame_at(&mut src, NOW).unwrap().verb, Verb::Set);
        assert_eq!(Command::parse_frame_at(&mut src, NOW).unwrap().verb, Verb::Quit);
        assert_eq!(src.position() as usize, input.len());
    }

    #[test]
    fn test_verb_round_trip() {
        for verb in Verb::ALL {
            assert_eq!(verb.as_str().parse::<Verb>().unwrap(), verb);
        }
        assert!("GET".parse::<Verb>().is_err());
    }

    #[test]
    fn test_is_storage() {
        let storage: Vec<_> = Verb::ALL.iter().filter(|v| v.is_storage()).map(|v| v.as_str()).collect();
        assert_eq!(storage, ["set", "add", "replace", "append", "prepend", "cas"]);
    }

    #[test]
    fn test_parse_frame_uses_wall_clock() {
        let before = unix_now();
        let command = Command::parse_frame(&mut Cursor::new(&b"touch k 60\r\n"[..])).unwrap();
        assert!(command.exptime >= before + 60);
        assert!(command.exptime <= unix_now() + 60);
    }

    #[test]
    fn test_normalize_exptime() {
        assert_eq!(normalize_exptime(0, NOW), 0);
        assert_eq!(normalize_exptime(1, NOW), NOW + 1);
        assert_eq!(normalize_exptime(REALTIME_MAX_DELTA + 5, NOW), REALTIME_MAX_DELTA + 5);
    }
}
