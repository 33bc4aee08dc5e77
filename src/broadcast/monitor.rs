//! The receiving end of the broadcast channel, as run by a companion display.

use std::io;
use std::net::SocketAddr;

use data_encoding::HEXLOWER;
use log::{debug, warn};
use rocket::tokio::net::UdpSocket;

use super::frame::decode_frame;
use crate::model::VoteTally;

/// Largest datagram we expect: a tally frame is a few dozen bytes.
const MAX_DATAGRAM: usize = 64 * 1024;

/// How many leading bytes of a frame to show in logs.
const LOG_PREFIX_LEN: usize = 5;

/// Listens for tally broadcasts and decodes them.
pub struct TallyMonitor {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl TallyMonitor {
    /// Listen on the given address, typically `0.0.0.0:<broadcast port>`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for the next datagram that decodes to a tally.
    /// Datagrams that don't decode are logged and skipped.
    pub async fn next_tally(&mut self) -> io::Result<(VoteTally, SocketAddr)> {
        loop {
            let (len, from) = self.socket.recv_from(&mut self.buf).await?;
            let frame = &self.buf[..len];
            debug!(
                "Frame from {from}: {}{}",
                HEXLOWER.encode(&frame[..len.min(LOG_PREFIX_LEN)]),
                if len > LOG_PREFIX_LEN { "..." } else { "" }
            );
            match decode_frame(frame) {
                Ok(tally) => return Ok((tally, from)),
                Err(e) => warn!("Discarding undecodable frame from {from}: {e}"),
            }
        }
    }
}

/// Latest known tally per candidate, in the order candidates were first seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TallyBoard {
    tallies: Vec<VoteTally>,
}

impl TallyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received tally. Returns true if the board changed.
    pub fn update(&mut self, tally: VoteTally) -> bool {
        match self.tallies.iter_mut().find(|known| known.id == tally.id) {
            Some(known) if *known == tally => false,
            Some(known) => {
                *known = tally;
                true
            }
            None => {
                self.tallies.push(tally);
                true
            }
        }
    }

    pub fn tallies(&self) -> &[VoteTally] {
        &self.tallies
    }

    pub fn total_votes(&self) -> u64 {
        self.tallies.iter().map(|tally| tally.votes).sum()
    }
}
