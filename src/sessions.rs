use dashmap::DashMap;
use log::debug;
use nohash_hasher::NoHashHasher;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    peer: String,
    close: CancellationToken,
}

/// The set of live sessions, keyed by session id.
///
/// Workers hold a [`Session`] guard; the registry only keeps what is needed
/// to enumerate sessions and close them from the outside.
#[derive(Debug, Clone)]
pub(crate) struct Sessions {
    next_id: Arc<AtomicU64>,
    entries: Arc<DashMap<u64, Entry, BuildHasherDefault<NoHashHasher<u64>>>>,
}

impl Sessions {
    pub(crate) fn new() -> Sessions {
        Sessions {
            next_id: Arc::new(AtomicU64::new(1)),
            entries: Arc::new(DashMap::with_hasher(BuildHasherDefault::default())),
        }
    }

    /// Adds a session; it stays registered until the returned guard drops.
    pub(crate) fn register(&self, peer: String) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let close = CancellationToken::new();
        self.entries.insert(
            id,
            Entry {
                peer: peer.clone(),
                close: close.clone(),
            },
        );
        Session {
            id,
            peer,
            close,
            sessions: self.clone(),
        }
    }

    /// Signals every registered session to close and returns how many were
    /// signalled. Sessions leave the registry on their own as they wind down.
    pub(crate) fn close_all(&self) -> usize {
        let mut closed = 0;
        for entry in self.entries.iter() {
            debug!("closing session {} ({})", entry.key(), entry.peer);
            entry.close.cancel();
            closed += 1;
        }
        closed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry membership of one session.
#[derive(Debug)]
pub(crate) struct Session {
    id: u64,
    peer: String,
    close: CancellationToken,
    sessions: Sessions,
}

impl Session {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    /// Fires when the server force-closes this session.
    pub(crate) fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.sessions.entries.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_removes_entry() {
        let sessions = Sessions::new();
        let a = sessions.register("a".to_string());
        let b = sessions.register("b".to_string());
        assert_ne!(a.id(), b.id());
        assert_eq!(sessions.len(), 2);

        drop(a);
        assert_eq!(sessions.len(), 1);
        drop(b);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_close_all_cancels_tokens() {
        let sessions = Sessions::new();
        let a = sessions.register("a".to_string());
        let b = sessions.register("b".to_string());
        let (ta, tb) = (a.close_token(), b.close_token());

        assert_eq!(sessions.close_all(), 2);
        assert!(ta.is_cancelled());
        assert!(tb.is_cancelled());
        // still registered until the workers let go
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn test_concurrent_register_and_drop() {
        let sessions = Sessions::new();
        let workers: Vec<_> = (0..8)
            .map(|n| {
                let sessions = sessions.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let session = sessions.register(format!("{n}-{i}"));
                        assert_eq!(session.peer(), format!("{n}-{i}"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(sessions.is_empty());
    }
}
