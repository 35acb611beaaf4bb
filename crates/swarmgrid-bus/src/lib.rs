//! swarmgrid-bus — the broadcast message bus of the push-mode swarm.
//!
//! Participants (dispatcher, workers) attach to a [`Hub`] either in-process
//! or over TCP and exchange [`Frame`]s. The bus is a broadcast medium:
//! every participant sees every message and filters by correlation id or
//! addressee.
//!
//! # Architecture
//!
//! ```text
//! Hub (broadcast fan-out)
//!   ├── attach() → BusPort ── in-process participant
//!   └── serve(listener)
//!         └── per connection: Framed<TcpStream, FrameCodec> ⇄ BusPort
//!
//! connect(addr) → BusPort ── remote participant
//!
//! FrameCodec
//!   ├── 0x01 envelope  (CBOR {id, sender, method, params, auth?})
//!   └── 0x02 binary    (zstd, follows a binary-reply envelope)
//! ```

pub mod codec;
pub mod error;
pub mod hub;
pub mod message;
pub mod tcp;

pub use codec::FrameCodec;
pub use error::{BusError, BusResult};
pub use hub::{BusPort, BusReceiver, BusSender, Hub};
pub use message::{Envelope, Frame, Method, epoch_secs_f64, payload_digest};
pub use tcp::{connect, serve};
