use crate::cache::Cache;
use mcserver::command::unix_now;
use mcserver::{status, Command, Context, Handler, Response};

/// Deletes every listed key; `DELETED` if at least one existed.
#[derive(Debug)]
pub struct Delete {
    cache: Cache,
}

impl Delete {
    pub fn new(cache: Cache) -> Delete {
        Delete { cache }
    }
}

impl Handler for Delete {
    fn call(&self, _ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()> {
        let now = unix_now();
        let mut deleted = 0;
        for (i, key) in command.keys.iter().enumerate() {
            // the noreply marker travels in the key list
            if command.noreply && i == 1 {
                continue;
            }
            if self.cache.delete(key, now) {
                deleted += 1;
            }
        }

        response.set_status(if deleted > 0 { status::DELETED } else { status::NOT_FOUND });
        Ok(())
    }
}
