//! In-process channel backend.
//!
//! Endpoint pairs rendezvous in a process-global registry keyed by
//! (acceptor, requester, requester-rank). Each pair owns two FIFO mailboxes,
//! one per direction, with condvar wakeups. Messages are framed: one
//! `send_bytes` call produces exactly one queue entry, and the receiver must
//! ask for exactly that many bytes.

use crate::com::Channel;
use crate::error::{CouplingError, Result};
use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

type PairKey = (String, String, usize);

#[derive(Default)]
struct Mailbox {
    q: Mutex<VecDeque<Vec<u8>>>,
    cv: Condvar,
}

impl Mailbox {
    fn push(&self, msg: Vec<u8>) {
        self.q.lock().expect("mailbox poisoned").push_back(msg);
        self.cv.notify_all();
    }

    fn pop(&self) -> Vec<u8> {
        let mut q = self.q.lock().expect("mailbox poisoned");
        loop {
            if let Some(msg) = q.pop_front() {
                return msg;
            }
            q = self.cv.wait(q).expect("mailbox poisoned");
        }
    }
}

#[derive(Default)]
struct PairState {
    /// acceptor -> requester
    down: Mailbox,
    /// requester -> acceptor
    up: Mailbox,
}

static RENDEZVOUS: Lazy<Mutex<HashMap<PairKey, Arc<PairState>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn pair_entry(key: PairKey) -> Arc<PairState> {
    let mut g = RENDEZVOUS.lock().expect("rendezvous poisoned");
    g.entry(key).or_default().clone()
}

/// One endpoint of an in-process channel.
pub struct LocalChannel {
    peer: String,
    state: Arc<PairState>,
    is_acceptor: bool,
}

impl Channel for LocalChannel {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let tx = if self.is_acceptor {
            &self.state.down
        } else {
            &self.state.up
        };
        tx.push(bytes.to_vec());
        Ok(())
    }

    fn recv_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let rx = if self.is_acceptor {
            &self.state.up
        } else {
            &self.state.down
        };
        let msg = rx.pop();
        if msg.len() != len {
            return Err(CouplingError::Protocol {
                peer: self.peer.clone(),
                expected: format!("{len}-byte message"),
                got: format!("{}-byte message", msg.len()),
            });
        }
        Ok(msg)
    }
}

pub(super) fn accept(
    acceptor: &str,
    requester: &str,
    expected_ranks: &[usize],
) -> Result<super::Connection> {
    let mut channels = std::collections::BTreeMap::new();
    for &rank in expected_ranks {
        let key = (acceptor.to_string(), requester.to_string(), rank);
        let chan: Box<dyn Channel> = Box::new(LocalChannel {
            peer: format!("{requester}[{rank}]"),
            state: pair_entry(key),
            is_acceptor: true,
        });
        channels.insert(rank, chan);
    }
    Ok(super::Connection { channels })
}

pub(super) fn request(acceptor: &str, requester: &str, my_rank: usize) -> Result<Box<dyn Channel>> {
    let key = (acceptor.to_string(), requester.to_string(), my_rank);
    Ok(Box::new(LocalChannel {
        peer: acceptor.to_string(),
        state: pair_entry(key),
        is_acceptor: false,
    }))
}
