use crate::cache::Cache;
use mcserver::command::unix_now;
use mcserver::{status, Command, Context, Handler, Response};

#[derive(Debug)]
pub struct FlushAll {
    cache: Cache,
}

impl FlushAll {
    pub fn new(cache: Cache) -> FlushAll {
        FlushAll { cache }
    }
}

impl Handler for FlushAll {
    fn call(&self, _ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()> {
        self.cache.flush_all(command.exptime, unix_now());
        response.set_status(status::OK);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Version;

impl Handler for Version {
    fn call(&self, _ctx: &Context, _command: &Command, response: &mut Response) -> anyhow::Result<()> {
        response.set_status(format!("VERSION {}", env!("CARGO_PKG_VERSION")));
        Ok(())
    }
}

/// General-purpose statistics. Arguments (`stats slabs`, ...) are ignored.
#[derive(Debug)]
pub struct Stats {
    cache: Cache,
    started: i64,
}

impl Stats {
    pub fn new(cache: Cache) -> Stats {
        Stats {
            cache,
            started: unix_now(),
        }
    }
}

impl Handler for Stats {
    fn call(&self, _ctx: &Context, _command: &Command, response: &mut Response) -> anyhow::Result<()> {
        let now = unix_now();
        let stats = [
            ("pid", std::process::id().to_string()),
            ("uptime", (now - self.started).to_string()),
            ("time", now.to_string()),
            ("version", env!("CARGO_PKG_VERSION").to_string()),
            ("curr_items", self.cache.len().to_string()),
        ];

        let mut lines: Vec<String> = stats
            .iter()
            .map(|(name, value)| format!("STAT {name} {value}"))
            .collect();
        lines.push(status::END.to_string());
        response.set_status(lines.join("\r\n"));
        Ok(())
    }
}
