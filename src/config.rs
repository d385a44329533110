use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:11211";
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Server tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// `host:port`, or a URL such as `unix:///run/mc.sock`.
    pub listen_addr: String,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Pause between closing the listener and force-closing sessions.
    pub shutdown_grace: Duration,
    /// Upper bound on waiting for sessions to end after they were closed.
    pub drain_timeout: Duration,
    pub drain_poll_interval: Duration,
    /// First delay after a transient accept error; doubles up to the max.
    pub accept_backoff_min: Duration,
    pub accept_backoff_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            shutdown_grace: Duration::from_millis(200),
            drain_timeout: Duration::from_secs(1),
            drain_poll_interval: Duration::from_millis(10),
            accept_backoff_min: Duration::from_millis(5),
            accept_backoff_max: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("MCSERVER_ADDR").ok().as_deref(),
            std::env::var("MCSERVER_READ_BUFFER").ok().as_deref(),
            std::env::var("MCSERVER_WRITE_BUFFER").ok().as_deref(),
            std::env::var("MCSERVER_SHUTDOWN_GRACE_MS").ok().as_deref(),
            std::env::var("MCSERVER_DRAIN_TIMEOUT_MS").ok().as_deref(),
        )
    }

    fn from_vars(
        listen_addr: Option<&str>,
        read_buffer: Option<&str>,
        write_buffer: Option<&str>,
        shutdown_grace_ms: Option<&str>,
        drain_timeout_ms: Option<&str>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: listen_addr
                .map(|s| s.to_string())
                .unwrap_or(defaults.listen_addr),
            read_buffer_size: read_buffer
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.read_buffer_size),
            write_buffer_size: write_buffer
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.write_buffer_size),
            shutdown_grace: shutdown_grace_ms
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),
            drain_timeout: drain_timeout_ms
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.drain_timeout),
            ..defaults
        }
    }
}
