//! Server side of the memcached text protocol.
//!
//! The crate reads requests off client connections, hands each parsed
//! [`Command`] to the [`Handler`] registered for its verb and writes the
//! [`Response`] back. Storage semantics live entirely in the handlers supplied
//! by the embedding application.
//!
//! ```no_run
//! use mcserver::{Command, Context, Response, Server, Verb};
//!
//! # async fn run() -> mcserver::Result<()> {
//! let server = Server::new("127.0.0.1:11211");
//! server.register(Verb::Version, |_: &Context, _: &Command, res: &mut Response| -> anyhow::Result<()> {
//!     res.set_status("VERSION 1.0");
//!     Ok(())
//! });
//! server.start().await?;
//! // ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
mod connection;
pub mod error;
mod frame;
pub mod handler;
pub mod listener;
mod parse;
pub mod response;
pub mod server;
mod sessions;

pub use command::{Command, Verb};
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use frame::FrameError;
pub use handler::{Context, Handler, Handlers};
pub use listener::ListenAddr;
pub use parse::ProtocolError;
pub use response::{status, Response, Value};
pub use server::{Server, State};
