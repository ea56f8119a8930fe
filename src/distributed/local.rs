//! In-process stand-in for a message-passing runtime.
//!
//! A [`LocalNetwork`] of `size` ranks is shared by one [`LocalComm`] per rank,
//! usually each driven from its own thread. Matching follows the usual
//! point-to-point rules: messages between a given `(source, dest, tag)` triple
//! are matched to posted receives in posting order, and a send completes only
//! once a receive has taken it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::communicator::{CommId, Communicator, OneSided, Tag};
use crate::topology::ProcId;

type Key = (ProcId, ProcId, Tag); // (src, dst, tag)

#[derive(Debug)]
enum Status {
    Pending,
    Complete(Bytes),
    Reaped,
    Cancelled,
}

type State = Arc<Mutex<Status>>;

fn is_cancelled(state: &State) -> bool {
    matches!(*state.lock(), Status::Cancelled)
}

struct Envelope {
    payload: Bytes,
    state: State,
}

struct PostedRecv {
    len: usize,
    state: State,
}

#[derive(Default)]
struct Mailbox {
    unmatched: VecDeque<Envelope>,
    posted: VecDeque<PostedRecv>,
}

impl Mailbox {
    /// Pair queued sends with posted receives, oldest first.
    fn progress(&mut self) {
        loop {
            while self.unmatched.front().is_some_and(|e| is_cancelled(&e.state)) {
                self.unmatched.pop_front();
            }
            while self.posted.front().is_some_and(|r| is_cancelled(&r.state)) {
                self.posted.pop_front();
            }
            let (Some(env), Some(recv)) = (self.unmatched.front(), self.posted.front()) else {
                return;
            };
            assert!(
                env.payload.len() <= recv.len,
                "message of {} bytes truncated by a {}-byte receive",
                env.payload.len(),
                recv.len
            );
            let (Some(env), Some(recv)) = (self.unmatched.pop_front(), self.posted.pop_front())
            else {
                unreachable!()
            };
            *recv.state.lock() = Status::Complete(env.payload);
            *env.state.lock() = Status::Complete(Bytes::new());
        }
    }

    /// Remove the oldest live unmatched send, completing it.
    fn take_unmatched(&mut self, len: usize) -> Option<Bytes> {
        while let Some(env) = self.unmatched.pop_front() {
            if is_cancelled(&env.state) {
                continue;
            }
            assert!(
                env.payload.len() <= len,
                "message of {} bytes truncated by a {}-byte receive",
                env.payload.len(),
                len
            );
            *env.state.lock() = Status::Complete(Bytes::new());
            return Some(env.payload);
        }
        None
    }
}

/// Handle for a request posted on a [`LocalComm`].
#[derive(Debug)]
pub struct LocalRequest {
    key: Key,
    state: State,
}

/// Shared matching engine for a fixed set of in-process ranks.
pub struct LocalNetwork {
    size: usize,
    id: CommId,
    mailboxes: DashMap<Key, Mailbox>,
    windows: DashMap<(ProcId, Tag), Bytes>,
    barrier: Barrier,
    live_requests: AtomicUsize,
}

impl LocalNetwork {
    pub fn new(size: usize) -> Arc<Self> {
        Self::with_id(size, CommId::WORLD)
    }

    pub fn with_id(size: usize, id: CommId) -> Arc<Self> {
        assert!(size > 0, "LocalNetwork needs at least one rank");
        Arc::new(Self {
            size,
            id,
            mailboxes: DashMap::new(),
            windows: DashMap::new(),
            barrier: Barrier::new(size),
            live_requests: AtomicUsize::new(0),
        })
    }

    /// One communicator per rank, in rank order.
    pub fn communicators(self: &Arc<Self>) -> Vec<LocalComm> {
        (0..self.size)
            .map(|rank| LocalComm {
                network: Arc::clone(self),
                rank,
            })
            .collect()
    }

    /// Requests posted but neither reaped by a completed test nor cancelled.
    pub fn live_requests(&self) -> usize {
        self.live_requests.load(Ordering::Acquire)
    }

    /// Sends not yet matched by any receive.
    pub fn unmatched_messages(&self) -> usize {
        self.mailboxes
            .iter()
            .map(|mb| {
                mb.unmatched
                    .iter()
                    .filter(|e| !is_cancelled(&e.state))
                    .count()
            })
            .sum()
    }

    fn track(&self, key: Key, status: Status) -> LocalRequest {
        self.live_requests.fetch_add(1, Ordering::AcqRel);
        LocalRequest {
            key,
            state: Arc::new(Mutex::new(status)),
        }
    }

    fn release(&self) {
        self.live_requests.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("size", &self.size)
            .field("id", &self.id)
            .field("live_requests", &self.live_requests())
            .finish()
    }
}

/// One rank's view of a [`LocalNetwork`].
#[derive(Clone, Debug)]
pub struct LocalComm {
    network: Arc<LocalNetwork>,
    rank: ProcId,
}

impl LocalComm {
    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }
}

impl Communicator for LocalComm {
    type Request = LocalRequest;

    fn rank(&self) -> ProcId {
        self.rank
    }

    fn size(&self) -> usize {
        self.network.size
    }

    fn comm_id(&self) -> CommId {
        self.network.id
    }

    fn isend(&self, dest: ProcId, tag: Tag, payload: Bytes) -> LocalRequest {
        assert!(dest < self.network.size, "send to rank {dest} out of range");
        let key = (self.rank, dest, tag);
        let req = self.network.track(key, Status::Pending);
        let mut mailbox = self.network.mailboxes.entry(key).or_default();
        mailbox.unmatched.push_back(Envelope {
            payload,
            state: Arc::clone(&req.state),
        });
        mailbox.progress();
        req
    }

    fn irecv(&self, source: ProcId, tag: Tag, len: usize) -> LocalRequest {
        assert!(
            source < self.network.size,
            "receive from rank {source} out of range"
        );
        let key = (source, self.rank, tag);
        let req = self.network.track(key, Status::Pending);
        let mut mailbox = self.network.mailboxes.entry(key).or_default();
        mailbox.posted.push_back(PostedRecv {
            len,
            state: Arc::clone(&req.state),
        });
        mailbox.progress();
        req
    }

    fn test(&self, request: &mut LocalRequest) -> Option<Bytes> {
        if let Some(mut mailbox) = self.network.mailboxes.get_mut(&request.key) {
            mailbox.progress();
        }
        let mut status = request.state.lock();
        match std::mem::replace(&mut *status, Status::Reaped) {
            Status::Complete(bytes) => {
                self.network.release();
                Some(bytes)
            }
            Status::Pending => {
                *status = Status::Pending;
                None
            }
            Status::Reaped => panic!("request tested after it completed"),
            Status::Cancelled => panic!("request tested after it was cancelled"),
        }
    }

    fn cancel(&self, request: LocalRequest) {
        // state changes that race with matching happen under the mailbox lock
        let _mailbox = self.network.mailboxes.get_mut(&request.key);
        let mut status = request.state.lock();
        match *status {
            Status::Pending => {
                *status = Status::Cancelled;
                self.network.release();
            }
            // too late to cancel; the payload is discarded
            Status::Complete(_) => {
                *status = Status::Reaped;
                self.network.release();
            }
            Status::Reaped | Status::Cancelled => {}
        }
    }

    fn iprobe(&self, source: ProcId, tag: Tag) -> Option<usize> {
        let mut mailbox = self.network.mailboxes.get_mut(&(source, self.rank, tag))?;
        mailbox.progress();
        mailbox
            .unmatched
            .iter()
            .find(|e| !is_cancelled(&e.state))
            .map(|e| e.payload.len())
    }

    fn recv(&self, source: ProcId, tag: Tag, len: usize) -> Bytes {
        let key = (source, self.rank, tag);
        loop {
            if let Some(mut mailbox) = self.network.mailboxes.get_mut(&key) {
                mailbox.progress();
                if let Some(bytes) = mailbox.take_unmatched(len) {
                    return bytes;
                }
            }
            std::thread::yield_now();
        }
    }

    fn barrier(&self) {
        self.network.barrier.wait();
    }
}

impl OneSided for LocalComm {
    fn rput(&self, target: ProcId, window: Tag, payload: Bytes) -> LocalRequest {
        assert!(target < self.network.size, "put to rank {target} out of range");
        self.network.windows.insert((target, window), payload);
        self.network
            .track((self.rank, target, window), Status::Complete(Bytes::new()))
    }

    fn read_window(&self, window: Tag) -> Option<Bytes> {
        self.network
            .windows
            .get(&(self.rank, window))
            .map(|b| b.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (LocalComm, LocalComm, Arc<LocalNetwork>) {
        let net = LocalNetwork::new(2);
        let mut comms = net.communicators();
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();
        (a, b, net)
    }

    #[test]
    fn send_completes_only_after_match() {
        let (a, b, net) = pair();
        let mut send = a.isend(1, 7, Bytes::from_static(b"hello"));
        assert!(a.test(&mut send).is_none());
        let mut recv = b.irecv(0, 7, 16);
        assert_eq!(b.test(&mut recv).as_deref(), Some(&b"hello"[..]));
        assert_eq!(a.test(&mut send).as_deref(), Some(&b""[..]));
        assert_eq!(net.live_requests(), 0);
    }

    #[test]
    fn receives_match_in_post_order() {
        let (a, b, _net) = pair();
        let mut r1 = b.irecv(0, 1, 8);
        let mut r2 = b.irecv(0, 1, 8);
        let mut s1 = a.isend(1, 1, Bytes::from_static(b"one"));
        let mut s2 = a.isend(1, 1, Bytes::from_static(b"two"));
        assert_eq!(b.test(&mut r2).as_deref(), Some(&b"two"[..]));
        assert_eq!(b.test(&mut r1).as_deref(), Some(&b"one"[..]));
        assert!(a.test(&mut s1).is_some());
        assert!(a.test(&mut s2).is_some());
    }

    #[test]
    fn tags_are_separate_channels() {
        let (a, b, _net) = pair();
        let _s = a.isend(1, 2, Bytes::from_static(b"x"));
        assert_eq!(b.iprobe(0, 3), None);
        assert_eq!(b.iprobe(0, 2), Some(1));
        assert_eq!(&b.recv(0, 2, 1)[..], b"x");
        assert_eq!(b.iprobe(0, 2), None);
    }

    #[test]
    fn cancelled_requests_are_released() {
        let (a, b, net) = pair();
        let recv = b.irecv(0, 4, 8);
        let send = a.isend(1, 5, Bytes::from_static(b"lost"));
        assert_eq!(net.live_requests(), 2);
        b.cancel(recv);
        a.cancel(send);
        assert_eq!(net.live_requests(), 0);
        // a cancelled send is never delivered
        assert_eq!(b.iprobe(0, 5), None);
        assert_eq!(net.unmatched_messages(), 0);
    }

    #[test]
    fn window_holds_latest_put() {
        let (a, b, net) = pair();
        assert!(b.read_window(9).is_none());
        let mut r1 = a.rput(1, 9, Bytes::from_static(b"v1"));
        let mut r2 = a.rput(1, 9, Bytes::from_static(b"v2"));
        assert_eq!(b.read_window(9).as_deref(), Some(&b"v2"[..]));
        assert!(a.test(&mut r1).is_some());
        assert!(a.test(&mut r2).is_some());
        assert_eq!(net.live_requests(), 0);
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let net = LocalNetwork::new(3);
        std::thread::scope(|s| {
            for comm in net.communicators() {
                s.spawn(move || comm.barrier());
            }
        });
    }
}
