use crate::command::Verb;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handler::{dispatch, Context, Handler, Handlers};
use crate::listener::{is_transient, ListenAddr, Listener, Stream};
use crate::response::Response;
use crate::sessions::{Session, Sessions};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Server`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Idle,
            1 => State::Running,
            2 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

/// A memcached text-protocol server.
///
/// Handlers are registered per verb before `start`. The server owns the
/// listener and one task per connection; `stop` shuts everything down.
/// Clones share the same server.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    state: AtomicU8,
    handlers: RwLock<Handlers>,
    sessions: Sessions,
    /// Cancelled by `stop`; ends the accept loop.
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    local_addr: Mutex<Option<ListenAddr>>,
}

impl Shared {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_running(&self) -> bool {
        self.state() == State::Running
    }
}

impl Server {
    /// Create a server for `addr` with default settings.
    pub fn new(addr: impl Into<String>) -> Server {
        Server::with_config(Config::new(addr))
    }

    pub fn with_config(config: Config) -> Server {
        Server {
            shared: Arc::new(Shared {
                config,
                state: AtomicU8::new(State::Idle as u8),
                handlers: RwLock::new(Handlers::new()),
                sessions: Sessions::new(),
                shutdown: CancellationToken::new(),
                accept_task: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Registers the handler for `verb`.
    ///
    /// Meant to be called before `start`; `quit` is handled by the server and
    /// never reaches a handler.
    pub fn register(&self, verb: Verb, handler: impl Handler) {
        self.shared.handlers.write().register(verb, handler);
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// The bound address, once started. Reports the real port when the
    /// configured one was 0.
    pub fn local_addr(&self) -> Option<ListenAddr> {
        self.shared.local_addr.lock().clone()
    }

    /// Number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Binds the listener and starts accepting connections in the background.
    ///
    /// Fails if the address is invalid or cannot be bound, or if the server
    /// was already started or stopped.
    pub async fn start(&self) -> Result<()> {
        match self.shared.state() {
            State::Idle => {}
            State::Running => return Err(Error::AlreadyStarted),
            State::Stopping | State::Stopped => return Err(Error::Stopped),
        }

        let addr: ListenAddr = self.shared.config.listen_addr.parse()?;
        let listener = Listener::bind(&addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        if !self.shared.transition(State::Idle, State::Running) {
            return match self.shared.state() {
                State::Running => Err(Error::AlreadyStarted),
                _ => Err(Error::Stopped),
            };
        }

        let local_addr = listener.local_addr().unwrap_or(addr);
        info!("memcached server starts on {}", local_addr);
        *self.shared.local_addr.lock() = Some(local_addr);

        let shared = self.shared.clone();
        let task = tokio::spawn(accept_loop(shared, listener));
        *self.shared.accept_task.lock() = Some(task);
        Ok(())
    }

    /// Waits for the accept loop to end and returns its outcome.
    ///
    /// Resolves with `Ok` after `stop`, or with `Error::Accept` if accepting
    /// failed for good. Returns at once if the server never started or the
    /// outcome was already taken.
    pub async fn wait(&self) -> Result<()> {
        let task = self.shared.accept_task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::Accept(err)),
            Err(err) if err.is_panic() => Err(Error::AcceptPanicked),
            Err(_) => Ok(()),
        }
    }

    /// Stops the server.
    ///
    /// Only the first call does anything: it closes the listener, gives
    /// in-flight requests a short grace period, force-closes the remaining
    /// sessions and waits (bounded) for them to end. Later calls return `Ok`
    /// right away.
    pub async fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        let previous = loop {
            let current = shared.state();
            match current {
                State::Stopping | State::Stopped => return Ok(()),
                State::Idle | State::Running => {
                    if shared.transition(current, State::Stopping) {
                        break current;
                    }
                }
            }
        };

        shared.shutdown.cancel();

        if previous == State::Idle {
            info!("memcached server has not started");
            shared.state.store(State::Stopped as u8, Ordering::Release);
            return Ok(());
        }

        // let requests already being processed run to completion
        sleep(shared.config.shutdown_grace).await;

        let closed = shared.sessions.close_all();
        debug!("force-closed {} sessions", closed);

        let deadline = Instant::now() + shared.config.drain_timeout;
        while !shared.sessions.is_empty() && Instant::now() < deadline {
            sleep(shared.config.drain_poll_interval).await;
        }
        if !shared.sessions.is_empty() {
            warn!(
                "{} sessions still open after {:?}",
                shared.sessions.len(),
                shared.config.drain_timeout
            );
        }

        shared.state.store(State::Stopped as u8, Ordering::Release);
        info!("memcached server stop");
        Ok(())
    }
}

/// Accepts connections until `stop` or a non-transient accept error.
async fn accept_loop(shared: Arc<Shared>, listener: Listener) -> std::io::Result<()> {
    let mut delay = Duration::ZERO;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) if is_transient(&err) => {
                delay = next_delay(delay, &shared.config);
                warn!("accept error: {}; retrying in {:?}", err, delay);
                tokio::select! {
                    _ = shared.shutdown.cancelled() => return Ok(()),
                    _ = sleep(delay) => continue,
                }
            }
            Err(err) => {
                error!("memcached server accept error: {}", err);
                return Err(err);
            }
        };
        delay = Duration::ZERO;

        // stop raced with this accept
        if !shared.is_running() {
            debug!("closing {} accepted during shutdown", peer);
            drop(stream);
            return Ok(());
        }

        let session = shared.sessions.register(peer);
        debug!("session {} opened for {}", session.id(), session.peer());
        tokio::spawn(run_session(shared.clone(), session, stream));
    }
}

fn next_delay(delay: Duration, config: &Config) -> Duration {
    if delay.is_zero() {
        return config.accept_backoff_min;
    }
    (delay * 2).min(config.accept_backoff_max)
}

/// Serves one connection until quit, peer close, an I/O error, a handler
/// panic or a forced close. Dropping `session` unregisters it.
async fn run_session(shared: Arc<Shared>, session: Session, stream: Stream) {
    let ctx = Context::new(session.id(), session.peer(), session.close_token());
    let mut connection = Connection::with_capacity(
        stream,
        shared.config.read_buffer_size,
        shared.config.write_buffer_size,
    );

    while shared.is_running() {
        let read = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                debug!("session {} closed by server", session.id());
                break;
            }
            read = connection.read_command() => read,
        };

        let command = match read {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!("{} closed the connection", session.peer());
                break;
            }
            Err(Error::Protocol(err)) => {
                warn!("{} sent a malformed request: {}", session.peer(), err);
                let response = Response::client_error(err.to_string());
                if !reply(&mut connection, &ctx, &response).await {
                    break;
                }
                continue;
            }
            Err(err) => {
                debug!("read from {} failed: {}", session.peer(), err);
                break;
            }
        };

        if command.verb == Verb::Quit {
            debug!("{} sent quit, closed", session.peer());
            break;
        }

        let handler = shared.handlers.read().get(command.verb);
        let response = match catch_unwind(AssertUnwindSafe(|| dispatch(handler.as_deref(), &ctx, &command))) {
            Ok(response) => response,
            Err(panic) => {
                error!(
                    "memcached server panic error: {}; session {} peer {} command {:?}",
                    panic_message(panic.as_ref()),
                    session.id(),
                    session.peer(),
                    command
                );
                break;
            }
        };

        if command.noreply {
            continue;
        }

        if !reply(&mut connection, &ctx, &response).await {
            break;
        }
    }

    debug!("session {} ended", session.id());
}

/// Writes `response` unless the session is closed first. Returns `false` when
/// the session has to end.
async fn reply(connection: &mut Connection<Stream>, ctx: &Context, response: &Response) -> bool {
    let written = tokio::select! {
        biased;
        _ = ctx.cancelled() => return false,
        written = connection.write_response(response) => written,
    };
    if let Err(err) = written {
        debug!("write to {} failed: {}", ctx.peer_addr(), err);
        return false;
    }
    true
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
