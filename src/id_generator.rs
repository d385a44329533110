use mcserver::command::unix_now;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out CAS uniques.
///
/// The high 32 bits hold the unix timestamp of the second the id was issued
/// in, the low 32 bits count ids within that second. Ids strictly increase
/// even if the clock steps back.
#[derive(Debug)]
pub struct Generator {
    last: AtomicU64,
}

impl Default for Generator {
    fn default() -> Self {
        Generator::new()
    }
}

impl Generator {
    pub fn new() -> Generator {
        Generator {
            last: AtomicU64::new(Self::combine(Self::current_ts(), 0)),
        }
    }

    fn current_ts() -> u32 {
        unix_now().clamp(0, u32::MAX as i64) as u32
    }

    fn combine(timestamp: u32, count: u32) -> u64 {
        (u64::from(timestamp) << 32) | u64::from(count)
    }

    pub fn gen(&self) -> u64 {
        let now = Self::combine(Self::current_ts(), 0);
        let next = |last: u64| if now > last { now } else { last + 1 };

        match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        {
            Ok(last) | Err(last) => next(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn test_combine() {
        assert_eq!(Generator::combine(1, 5), 4294967301);
    }

    #[test]
    fn test_strictly_increasing() {
        let gen = Generator::new();
        let mut last = gen.gen();
        for _ in 0..1000 {
            let id = gen.gen();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_unique_across_threads() {
        let gen = Arc::new(Generator::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                thread::spawn(move || (0..500).map(|_| gen.gen()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u64> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_different_seconds() {
        let gen = Generator::new();
        let id = gen.gen();
        thread::sleep(Duration::from_millis(1100));
        assert!(gen.gen() >> 32 > id >> 32);
    }
}
