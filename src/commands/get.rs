use crate::cache::Cache;
use log::debug;
use mcserver::command::unix_now;
use mcserver::{status, Command, Context, Handler, Response, Value};

/// Get the values of one or more keys.
///
/// Every hit becomes a `VALUE` block, in the order the keys were requested;
/// misses are skipped. `gets` also returns the CAS unique of each item.
#[derive(Debug)]
pub struct Get {
    cache: Cache,
    with_cas: bool,
}

impl Get {
    /// Create a new `Get` handler; `with_cas` selects `gets` behaviour.
    pub fn new(cache: Cache, with_cas: bool) -> Get {
        Get { cache, with_cas }
    }
}

impl Handler for Get {
    fn call(&self, _ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()> {
        let now = unix_now();
        for key in &command.keys {
            if let Some(item) = self.cache.get(key, now) {
                let mut value = Value::new(key.clone(), item.flags, item.data);
                if self.with_cas {
                    value = value.with_cas(item.cas.to_string());
                }
                debug!("{:?}", value);
                response.push(value);
            }
        }

        response.set_status(status::END);
        Ok(())
    }
}
