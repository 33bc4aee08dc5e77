//! The tally broadcast channel: one encrypted UDP datagram per candidate,
//! sent to the LAN broadcast address every [`TICK_INTERVAL`].
//!
//! The channel is advisory. Nothing the station does depends on a datagram
//! arriving, so every failure here is logged and swallowed.

mod frame;
mod monitor;
mod transmitter;

pub use frame::{decode_frame, encode_frame, FrameError};
pub use monitor::{TallyBoard, TallyMonitor};
pub use transmitter::{
    open_broadcast_socket, resolve_port, transmit, BroadcastTransmitter, TickReport, TransmitError,
    Transport, DEFAULT_PORT, TICK_INTERVAL,
};
