use crate::command::{Command, Verb};
use crate::response::{status, Response};
use log::error;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Per-session information handed to every handler call.
#[derive(Clone, Debug)]
pub struct Context {
    session_id: u64,
    peer: String,
    closed: CancellationToken,
}

impl Context {
    pub fn new(session_id: u64, peer: impl Into<String>, closed: CancellationToken) -> Context {
        Context {
            session_id,
            peer: peer.into(),
            closed,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> &str {
        &self.peer
    }

    /// True once the session has been force-closed by a server shutdown.
    pub fn is_cancelled(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

/// Computes the response for one command.
///
/// Returning `Err` turns the status line into `SERVER_ERROR <err>`; values
/// already pushed are kept. The session continues either way.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Context, &Command, &mut Response) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn call(&self, ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()> {
        self(ctx, command, response)
    }
}

/// Handler registry, one handler per verb.
#[derive(Clone, Default)]
pub struct Handlers {
    handlers: HashMap<Verb, Arc<dyn Handler>>,
}

impl Handlers {
    pub fn new() -> Handlers {
        Handlers::default()
    }

    /// Registers `handler` for `verb`, replacing any previous one.
    pub fn register(&mut self, verb: Verb, handler: impl Handler) {
        self.handlers.insert(verb, Arc::new(handler));
    }

    pub fn get(&self, verb: Verb) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&verb).cloned()
    }

    pub fn contains(&self, verb: Verb) -> bool {
        self.handlers.contains_key(&verb)
    }
}

/// Runs `handler` for `command` and returns the response to send.
///
/// Without a handler the response is `ERROR <verb> not implemented`.
pub fn dispatch(handler: Option<&dyn Handler>, ctx: &Context, command: &Command) -> Response {
    let Some(handler) = handler else {
        return Response::error(format!("{} not implemented", command.verb));
    };

    let mut response = Response::new();
    if let Err(err) = handler.call(ctx, command, &mut response) {
        error!(
            "handler for {} failed: {:#}; session {} peer {} command {:?}",
            command.verb, err, ctx.session_id, ctx.peer, command
        );
        response.set_status(format!("{}{}", status::SERVER_ERROR, err));
    }
    response
}
