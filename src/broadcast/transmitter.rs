use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use rocket::serde::json::serde_json;
use rocket::tokio::{net::UdpSocket, sync::watch, time::Duration};
use thiserror::Error;

use super::frame::encode_frame;
use crate::model::VoteSession;
use crate::periodic_task::PeriodicTask;

/// Time between two transmissions of the full tally set.
pub const TICK_INTERVAL: Duration = Duration::from_millis(800);

/// Port used when the configured one is out of range.
pub const DEFAULT_PORT: u16 = 8999;

/// Something datagrams can be sent through.
#[rocket::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_frame(&self, frame: &[u8], target: SocketAddr) -> io::Result<usize>;
}

#[rocket::async_trait]
impl Transport for UdpSocket {
    async fn send_frame(&self, frame: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.send_to(frame, target).await
    }
}

/// Open a UDP socket on an ephemeral port with broadcasting enabled.
pub async fn open_broadcast_socket() -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Turn an operator-entered port into the one actually used.
/// Anything outside `1025..=65534` falls back to `default`.
pub fn resolve_port(configured: i64, default: u16) -> u16 {
    match u16::try_from(configured) {
        Ok(port) if port > 1024 && port < u16::MAX => port,
        _ => default,
    }
}

/// Why one datagram of a tick was not sent.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("Could not encode tally for {id:?}: {source}")]
    Encode {
        id: String,
        source: serde_json::Error,
    },
    #[error("Failed to broadcast tally for {id:?} to {target}: {source}")]
    Send {
        id: String,
        target: SocketAddr,
        source: io::Error,
    },
}

/// What happened during one transmission tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: usize,
    pub failed: usize,
}

/// Send every tally of `session` as its own datagram.
///
/// Each send is independent: a failure is logged and the remaining tallies are
/// still sent. An empty session sends nothing.
pub async fn transmit<T>(transport: &T, session: &VoteSession, target: SocketAddr) -> TickReport
where
    T: Transport + ?Sized,
{
    let mut report = TickReport::default();
    for tally in session.iter() {
        let sent = match encode_frame(tally) {
            Ok(frame) => transport
                .send_frame(&frame, target)
                .await
                .map_err(|source| TransmitError::Send {
                    id: tally.id.clone(),
                    target,
                    source,
                }),
            Err(source) => Err(TransmitError::Encode {
                id: tally.id.clone(),
                source,
            }),
        };
        match sent {
            Ok(_) => report.sent += 1,
            Err(e) => {
                warn!("{e}");
                report.failed += 1;
            }
        }
    }
    if !session.is_empty() {
        trace!("{} candidates data sent to {target}", report.sent);
    }
    report
}

/// A running transmission: the timer task owns the socket.
struct Running {
    task: PeriodicTask,
    target: SocketAddr,
}

/// Periodically broadcasts the latest tallies until stopped.
///
/// At most one transmission runs per transmitter; starting again first stops
/// the previous one, closing its socket and cancelling its timer.
#[derive(Default)]
pub struct BroadcastTransmitter {
    running: Option<Running>,
}

impl BroadcastTransmitter {
    pub fn new() -> Self {
        Self { running: None }
    }

    /// Start broadcasting whatever `tallies` holds at each tick.
    pub async fn start<T: Transport>(
        &mut self,
        transport: T,
        tallies: watch::Receiver<VoteSession>,
        target: SocketAddr,
    ) {
        self.stop().await;

        let transport = Arc::new(transport);
        let task = PeriodicTask::new(TICK_INTERVAL, move || {
            let transport = transport.clone();
            // Clone so the watch lock is not held across sends.
            let session = tallies.borrow().clone();
            async move {
                transmit(transport.as_ref(), &session, target).await;
            }
        });
        self.running = Some(Running { task, target });
        info!("Broadcasting tallies to {target}");
    }

    /// Stop broadcasting. Stopping an idle transmitter does nothing.
    /// Returns whether a transmission was actually running.
    pub async fn stop(&mut self) -> bool {
        match self.running.take() {
            Some(running) => {
                running.task.cancel().await;
                info!("Stopped broadcasting to {}", running.target);
                true
            }
            None => {
                debug!("Broadcast stop requested but nothing is running");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Where datagrams are currently being sent, if anywhere.
    pub fn target(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.target)
    }
}
