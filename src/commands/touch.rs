use crate::cache::Cache;
use mcserver::command::unix_now;
use mcserver::{status, Command, Context, Handler, Response};

#[derive(Debug)]
pub struct Touch {
    cache: Cache,
}

impl Touch {
    pub fn new(cache: Cache) -> Touch {
        Touch { cache }
    }
}

impl Handler for Touch {
    fn call(&self, _ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()> {
        let touched = self.cache.touch(&command.key, command.exptime, unix_now());
        response.set_status(if touched { status::TOUCHED } else { status::NOT_FOUND });
        Ok(())
    }
}
