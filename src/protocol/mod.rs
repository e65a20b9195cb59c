// src/protocol/mod.rs

//! Wire protocol between the supervisor and its managed processes.
//!
//! - [`message`] defines the text messages (`P:`, `S:`, `R:`, `F:`).
//! - [`socket`] frames messages over a per-process Unix stream socket.
//! - [`fd`] passes descriptors over the datagram control channel that
//!   processes use to register.

pub mod fd;
pub mod message;
pub mod socket;

pub use fd::{ControlChannel, MASTER_FD_ENV, recv_descriptor, send_descriptor};
pub use message::{Message, MessageError};
pub use socket::{CONTROL_BUFFER_SIZE, ControlSocket, MAX_FRAME_LEN, MessageReader, MessageWriter};
