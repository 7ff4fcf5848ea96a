//! TCP channel backend.
//!
//! The acceptor binds the configured address and waits for one connection
//! per expected requester rank; every requester announces its rank in the
//! first four bytes. Framing on the stream is byte-exact: one `send_bytes`
//! writes its payload contiguously and the receiver reads exactly the
//! length it expects next, so no extra per-message header is needed beyond
//! the protocol's own count prefixes.

use crate::com::Channel;
use crate::error::{CouplingError, Result};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

/// How long a requester keeps retrying while the acceptor has not bound yet.
const CONNECT_RETRY: Duration = Duration::from_millis(50);
const CONNECT_ATTEMPTS: usize = 1200;

pub struct SocketChannel {
    peer: String,
    stream: TcpStream,
}

impl Channel for SocketChannel {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .map_err(|e| CouplingError::transport(&self.peer, e))
    }

    fn recv_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .map_err(|e| CouplingError::transport(&self.peer, e))?;
        Ok(buf)
    }
}

pub(super) fn accept(
    address: &str,
    acceptor: &str,
    requester: &str,
    expected_ranks: &[usize],
) -> Result<super::Connection> {
    let listener =
        TcpListener::bind(address).map_err(|e| CouplingError::transport(requester, e))?;
    let mut channels: BTreeMap<usize, Box<dyn Channel>> = BTreeMap::new();
    while channels.len() < expected_ranks.len() {
        let (stream, _) = listener
            .accept()
            .map_err(|e| CouplingError::transport(requester, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CouplingError::transport(requester, e))?;
        let mut chan = SocketChannel {
            peer: requester.to_string(),
            stream,
        };
        let rank = chan.recv_i32()?;
        let rank = usize::try_from(rank).map_err(|_| CouplingError::Protocol {
            peer: requester.to_string(),
            expected: "non-negative requester rank".to_string(),
            got: rank.to_string(),
        })?;
        if !expected_ranks.contains(&rank) {
            return Err(CouplingError::Protocol {
                peer: requester.to_string(),
                expected: format!("rank in {expected_ranks:?}"),
                got: rank.to_string(),
            });
        }
        chan.peer = format!("{requester}[{rank}]");
        log::debug!("`{acceptor}` accepted `{requester}` rank {rank} on {address}");
        channels.insert(rank, Box::new(chan));
    }
    Ok(super::Connection { channels })
}

pub(super) fn request(address: &str, acceptor: &str, my_rank: usize) -> Result<Box<dyn Channel>> {
    let mut last_err = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match TcpStream::connect(address) {
            Ok(stream) => {
                stream
                    .set_nodelay(true)
                    .map_err(|e| CouplingError::transport(acceptor, e))?;
                let mut chan = SocketChannel {
                    peer: acceptor.to_string(),
                    stream,
                };
                chan.send_i32(my_rank as i32)?;
                return Ok(Box::new(chan));
            }
            Err(e) => {
                last_err = Some(e);
                std::thread::sleep(CONNECT_RETRY);
            }
        }
    }
    Err(CouplingError::transport(
        acceptor,
        last_err.unwrap_or_else(|| std::io::Error::other("connect retries exhausted")),
    ))
}

#[cfg(test)]
mod tests {
    use crate::com::{accept_connection, request_connection, TransportKind};

    #[test]
    fn socket_round_trip() {
        let kind = TransportKind::Socket {
            address: "127.0.0.1:39251".to_string(),
        };
        let kind2 = kind.clone();
        let requester = std::thread::spawn(move || {
            let mut chan = request_connection(&kind2, "acc", "req", 0).unwrap();
            chan.send_f64s(&[1.5, -2.5]).unwrap();
            chan.recv_string().unwrap()
        });
        let mut conn = accept_connection(&kind, "acc", "req", &[0]).unwrap();
        let master = conn.master().unwrap();
        assert_eq!(master.recv_f64s().unwrap(), vec![1.5, -2.5]);
        master.send_string("ok").unwrap();
        assert_eq!(requester.join().unwrap(), "ok");
    }
}
