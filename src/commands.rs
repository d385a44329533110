mod admin;
mod arith;
mod delete;
mod get;
mod set;
mod touch;

use crate::cache::Cache;
use mcserver::{Server, Verb};

pub use admin::{FlushAll, Stats, Version};
pub use arith::Arith;
pub use delete::Delete;
pub use get::Get;
pub use set::Set;
pub use touch::Touch;

/// Registers a handler backed by `cache` for every verb but `quit`.
pub fn register(server: &Server, cache: &Cache) {
    server.register(Verb::Get, Get::new(cache.clone(), false));
    server.register(Verb::Gets, Get::new(cache.clone(), true));

    for verb in [Verb::Set, Verb::Add, Verb::Replace, Verb::Append, Verb::Prepend, Verb::Cas] {
        server.register(verb, Set::new(cache.clone()));
    }

    server.register(Verb::Delete, Delete::new(cache.clone()));
    server.register(Verb::Incr, Arith::new(cache.clone()));
    server.register(Verb::Decr, Arith::new(cache.clone()));
    server.register(Verb::Touch, Touch::new(cache.clone()));
    server.register(Verb::FlushAll, FlushAll::new(cache.clone()));
    server.register(Verb::Version, Version);
    server.register(Verb::Stats, Stats::new(cache.clone()));
}
