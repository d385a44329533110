use crate::cache::{Cache, Delta};
use mcserver::command::unix_now;
use mcserver::{status, Command, Context, Handler, Response, Verb};

/// `incr` and `decr` on decimal values.
#[derive(Debug)]
pub struct Arith {
    cache: Cache,
}

impl Arith {
    pub fn new(cache: Cache) -> Arith {
        Arith { cache }
    }
}

impl Handler for Arith {
    fn call(&self, _ctx: &Context, command: &Command, response: &mut Response) -> anyhow::Result<()> {
        let Ok(delta) = u64::try_from(command.delta) else {
            *response = Response::client_error("invalid numeric delta argument");
            return Ok(());
        };

        let incr = command.verb == Verb::Incr;
        match self.cache.incr_decr(&command.key, delta, incr, unix_now()) {
            Delta::Updated(value) => response.set_status(value.to_string()),
            Delta::NotFound => response.set_status(status::NOT_FOUND),
            Delta::NotNumeric => {
                *response = Response::client_error("cannot increment or decrement non-numeric value")
            }
        }
        Ok(())
    }
}
