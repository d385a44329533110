use crate::cache::{Cache, CasOutcome};
use anyhow::bail;
use log::debug;
use mcserver::command::unix_now;
use mcserver::{status, Command, Context, Handler, Response, Verb};

/// Storage commands: `set`, `add`, `replace`, `append`, `prepend` and `cas`.
///
/// `append` and `prepend` keep the flags and exptime of the existing item.
#[derive(Debug)]
pub struct Set {
    cache: Cache,
}

impl Set {
    pub fn new(cache: Cache) -> Set {
        Set { cache }
    }
}

impl Handler for Set {
    fn call(&self, _ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()> {
        let now = unix_now();
        let Command {
            key,
            flags,
            exptime,
            data,
            ..
        } = command;

        let stored = match command.verb {
            Verb::Set => {
                self.cache.set(key, flags, *exptime, data.clone());
                true
            }
            Verb::Add => self.cache.add(key, flags, *exptime, data.clone(), now),
            Verb::Replace => self.cache.replace(key, flags, *exptime, data.clone(), now),
            Verb::Append => self.cache.append(key, data, now),
            Verb::Prepend => self.cache.prepend(key, data, now),
            Verb::Cas => {
                let Ok(unique) = command.cas.parse::<u64>() else {
                    *response = Response::client_error("bad command line format");
                    return Ok(());
                };
                let outcome = self.cache.cas(key, flags, *exptime, data.clone(), unique, now);
                debug!("cas {} -> {:?}", key, outcome);
                response.set_status(match outcome {
                    CasOutcome::Stored => status::STORED,
                    CasOutcome::Exists => status::EXISTS,
                    CasOutcome::NotFound => status::NOT_FOUND,
                });
                return Ok(());
            }
            other => bail!("storage handler cannot serve {other}"),
        };

        debug!("{} {} -> {}", command.verb, key, stored);
        response.set_status(if stored { status::STORED } else { status::NOT_STORED });
        Ok(())
    }
}
