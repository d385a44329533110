use crate::command::{unix_now, Command};
use crate::config::{DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::frame::FrameError;
use crate::parse::ProtocolError;
use crate::response::Response;
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

/// Reads commands from and writes responses to one client stream.
///
/// Incoming bytes collect in `buffer` until a whole request is available;
/// outgoing bytes go through a `BufWriter` and are flushed once per response.
#[derive(Debug)]
pub struct Connection<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
    scratch: BytesMut,
    /// Set while the tail of an over-long line is still arriving.
    skip_line: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Connection<S> {
        Connection::with_capacity(stream, DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE)
    }

    pub fn with_capacity(stream: S, read_buffer: usize, write_buffer: usize) -> Connection<S> {
        Connection {
            stream: BufWriter::with_capacity(write_buffer, stream),
            buffer: BytesMut::with_capacity(read_buffer),
            scratch: BytesMut::new(),
            skip_line: false,
        }
    }

    /// Reads one command from the stream.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the peer closed the stream between requests.
    /// `Error::Protocol` for malformed input; the offending bytes are already
    /// dropped, so the caller can reply and read the next command.
    /// `Error::Transport` when the stream fails or closes mid-request.
    pub async fn read_command(&mut self) -> Result<Option<Command>> {
        loop {
            if self.skip_long_line() {
                if let Some(command) = self.parse_command()? {
                    return Ok(Some(command));
                }
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a request",
                )
                .into());
            }
        }
    }

    fn parse_command(&mut self) -> Result<Option<Command>> {
        let mut buf = Cursor::new(&self.buffer[..]);
        match Command::parse_frame_at(&mut buf, unix_now()) {
            Ok(command) => {
                let len = buf.position() as usize;
                self.buffer.advance(len);
                Ok(Some(command))
            }
            Err(FrameError::Incomplete) => Ok(None),
            Err(FrameError::Protocol(err)) => {
                let len = buf.position() as usize;
                if err == ProtocolError::LineTooLong {
                    self.skip_line = !self.buffer[..len].ends_with(b"\n");
                }
                self.buffer.advance(len);
                Err(Error::Protocol(err))
            }
        }
    }

    /// Drops input up to the end of a rejected over-long line. Returns `false`
    /// while that end has not arrived.
    fn skip_long_line(&mut self) -> bool {
        if !self.skip_line {
            return true;
        }
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(end) => {
                self.buffer.advance(end + 1);
                self.skip_line = false;
                true
            }
            None => {
                self.buffer.clear();
                false
            }
        }
    }

    /// Writes a complete response and flushes it.
    pub async fn write_response(&mut self, response: &Response) -> io::Result<()> {
        self.scratch.clear();
        response.encode(&mut self.scratch);
        self.stream.write_all(&self.scratch).await?;
        self.stream.flush().await
    }

    /// Answers malformed input with `CLIENT_ERROR <description>`.
    pub async fn write_client_error(&mut self, err: &ProtocolError) -> io::Result<()> {
        self.write_response(&Response::client_error(err.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Verb;
    use crate::response::{status, Value};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_reads_across_partial_writes() {
        let (client, server) = duplex(64);
        let mut connection = Connection::new(server);
        let mut client = client;

        let reader = tokio::spawn(async move { connection.read_command().await });
        client.write_all(b"set KEY 0 0 10\r\n12345").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"67890\r\n").await.unwrap();

        let command = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(command.verb, Verb::Set);
        assert_eq!(&command.data[..], b"1234567890");
    }

    #[tokio::test]
    async fn test_clean_close_between_requests() {
        let (client, server) = duplex(64);
        let mut connection = Connection::new(server);
        let mut client = client;
        client.write_all(b"get a\r\n").await.unwrap();
        drop(client);

        assert_eq!(connection.read_command().await.unwrap().unwrap().keys, vec!["a"]);
        assert!(connection.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_mid_payload_is_transport_error() {
        let (client, server) = duplex(64);
        let mut connection = Connection::new(server);
        let mut client = client;
        client.write_all(b"set k 0 0 10\r\n123").await.unwrap();
        drop(client);

        let err = connection.read_command().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_protocol_error_then_recovers() {
        let (client, server) = duplex(256);
        let mut connection = Connection::new(server);
        let mut client = client;
        client
            .write_all(b"bogus line\r\nset k 0 0 3\r\nabcXY\r\nget k\r\n")
            .await
            .unwrap();

        let err = connection.read_command().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnknownCommand(_))));
        let err = connection.read_command().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::ExpectedCr)));
        // the broken data block is dropped with its two terminator bytes
        let err = connection.read_command().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::EmptyLine)));
        let command = connection.read_command().await.unwrap().unwrap();
        assert_eq!(command.verb, Verb::Get);
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let (mut client, server) = duplex(4096);
        let mut connection = Connection::new(server);

        let writer = tokio::spawn(async move {
            client.write_all(b"get ").await.unwrap();
            let chunk = vec![b'a'; 1024];
            for _ in 0..40 {
                client.write_all(&chunk).await.unwrap();
            }
            client.write_all(b" b\r\nget k\r\n").await.unwrap();
            client
        });

        let err = connection.read_command().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::LineTooLong)));
        let command = connection.read_command().await.unwrap().unwrap();
        assert_eq!(command.keys, vec!["k"]);
        assert!(connection.buffer.len() <= 2 * crate::frame::MAX_LINE_LEN);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_responses() {
        let (mut client, server) = duplex(256);
        let mut connection = Connection::new(server);

        let mut response = Response::with_status(status::END);
        response.push(Value::new("k", "0", &b"v"[..]));
        connection.write_response(&response).await.unwrap();
        connection.write_client_error(&ProtocolError::EmptyLine).await.unwrap();
        drop(connection);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"VALUE k 0 1\r\nv\r\nEND\r\nCLIENT_ERROR empty line\r\n");
    }
}
