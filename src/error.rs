use crate::listener::AddressError;
use crate::parse::ProtocolError;
use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed client input; the session answers and goes on.
    #[error("protocol error; {0}")]
    Protocol(#[from] ProtocolError),
    /// The stream failed or ended mid-request; the session is over.
    #[error("transport error; {0}")]
    Transport(#[from] io::Error),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("server already started")]
    AlreadyStarted,
    #[error("server has been stopped")]
    Stopped,
    /// Non-transient accept failure; the server no longer accepts connections.
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),
    #[error("accept loop panicked")]
    AcceptPanicked,
}

impl Error {
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguished() {
        let protocol: Error = ProtocolError::EmptyLine.into();
        assert!(protocol.is_protocol());
        assert_eq!(protocol.to_string(), "protocol error; empty line");

        let transport: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(!transport.is_protocol());
    }
}
