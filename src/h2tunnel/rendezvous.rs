//! The v2 tunnel-ID rendezvous table.
//!
//! Grounded on the only pre-existing `dashmap` usage in the codebase this
//! crate started from (the connection-tracking table): insert-if-absent,
//! resolve-one-shot, remove. The three terminal states the design notes ask
//! for (pending, resolved, rejected) are encoded explicitly through
//! `ResolveResult` rather than relying on promise semantics.
//!
//! GET-before-POST is a single wait registration rather than sleep-and-poll:
//! a GET that arrives first stores a "waiter" the POST side wakes directly,
//! bounded by a 2000ms timeout.

use dashmap::DashMap;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::oneshot;

/// Result handed to the GET side once the POST side has dialed (or failed
/// to dial) the target: the readable half of the TCP connection, or an
/// error string used to compose the 502 response body.
pub type ResolveResult = Result<OwnedReadHalf, String>;

/// How long a GET that arrives before its matching POST will wait.
pub const GET_BEFORE_POST_GRACE: Duration = Duration::from_millis(2000);

enum Slot {
    /// A POST is actively dialing; `GET` takes the receiver and awaits it.
    ResolvingForGet(oneshot::Receiver<ResolveResult>),
    /// A GET arrived first and is waiting for a POST to show up; `POST`
    /// hands the resolve receiver through this channel to wake it.
    AwaitingPost(oneshot::Sender<oneshot::Receiver<ResolveResult>>),
}

#[derive(Debug)]
pub enum PostRegistration {
    /// No POST or GET was registered for this id; proceed normally, and
    /// resolve/reject the returned sender once dial completes.
    Fresh(oneshot::Sender<ResolveResult>),
    /// A POST is already pending for this id.
    Conflict,
}

#[derive(Debug)]
pub enum GetRegistration {
    /// A POST had already registered; await this receiver directly.
    Ready(oneshot::Receiver<ResolveResult>),
    /// No POST yet; await this receiver (bounded by `GET_BEFORE_POST_GRACE`)
    /// for the POST side to hand off its resolve receiver.
    Waiting(oneshot::Receiver<oneshot::Receiver<ResolveResult>>),
    /// Another GET is already waiting on this id.
    AlreadyWaiting,
}

/// Process-wide table of in-flight v2 tunnel rendezvous.
#[derive(Default)]
pub struct RendezvousTable {
    slots: DashMap<String, Slot>,
}

impl RendezvousTable {
    pub fn new() -> Self {
        RendezvousTable { slots: DashMap::new() }
    }

    /// Register a POST for `id`. On `Fresh`, the caller owns the sender and
    /// must eventually resolve or reject it once the dial attempt settles.
    pub fn register_post(&self, id: &str) -> PostRegistration {
        match self.slots.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(Slot::ResolvingForGet(rx));
                PostRegistration::Fresh(tx)
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::ResolvingForGet(_) => PostRegistration::Conflict,
                    Slot::AwaitingPost(_) => {
                        // A GET is already waiting: hand off a fresh resolve
                        // pair directly to it and free the slot.
                        let (tx, rx) = oneshot::channel();
                        if let Slot::AwaitingPost(waiter) = occupied.remove() {
                            let _ = waiter.send(rx);
                        }
                        PostRegistration::Fresh(tx)
                    }
                }
            }
        }
    }

    /// Register a GET for `id`.
    pub fn register_get(&self, id: &str) -> GetRegistration {
        match self.slots.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (waiter_tx, waiter_rx) = oneshot::channel();
                vacant.insert(Slot::AwaitingPost(waiter_tx));
                GetRegistration::Waiting(waiter_rx)
            }
            dashmap::mapref::entry::Entry::Occupied(occupied) => match occupied.get() {
                Slot::AwaitingPost(_) => GetRegistration::AlreadyWaiting,
                Slot::ResolvingForGet(_) => {
                    if let (_, Slot::ResolvingForGet(rx)) = occupied.remove_entry() {
                        GetRegistration::Ready(rx)
                    } else {
                        unreachable!("match guard already confirmed ResolvingForGet")
                    }
                }
            },
        }
    }

    /// Remove a still-`AwaitingPost` entry, e.g. after a GET's wait timed
    /// out with no POST arriving.
    pub fn remove_if_waiting(&self, id: &str) {
        if let dashmap::mapref::entry::Entry::Occupied(occupied) = self.slots.entry(id.to_string()) {
            if matches!(occupied.get(), Slot::AwaitingPost(_)) {
                occupied.remove();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_then_post_conflicts() {
        let table = RendezvousTable::new();
        assert!(matches!(table.register_post("t1"), PostRegistration::Fresh(_)));
        assert!(matches!(table.register_post("t1"), PostRegistration::Conflict));
    }

    #[tokio::test]
    async fn post_then_get_resolves() {
        let table = RendezvousTable::new();
        let tx = match table.register_post("t1") {
            PostRegistration::Fresh(tx) => tx,
            _ => panic!("expected fresh registration"),
        };

        let rx = match table.register_get("t1") {
            GetRegistration::Ready(rx) => rx,
            _ => panic!("expected ready registration"),
        };

        assert!(tx.send(Err("dial failed".to_string())).is_ok());
        let result = rx.await.unwrap();
        assert_eq!(result, Err("dial failed".to_string()));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn get_before_post_wakes_on_post_arrival() {
        let table = RendezvousTable::new();
        let waiter_rx = match table.register_get("t1") {
            GetRegistration::Waiting(rx) => rx,
            _ => panic!("expected waiting registration"),
        };

        let tx = match table.register_post("t1") {
            PostRegistration::Fresh(tx) => tx,
            _ => panic!("expected fresh registration after handoff"),
        };

        let resolve_rx = waiter_rx.await.unwrap();
        assert!(tx.send(Err("boom".to_string())).is_ok());
        assert_eq!(resolve_rx.await.unwrap(), Err("boom".to_string()));
    }

    #[test]
    fn second_get_while_waiting_is_rejected() {
        let table = RendezvousTable::new();
        assert!(matches!(table.register_get("t1"), GetRegistration::Waiting(_)));
        assert!(matches!(table.register_get("t1"), GetRegistration::AlreadyWaiting));
    }
}
