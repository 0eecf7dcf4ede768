//! socktun engine
//!
//! User-space IPv4 router between one TUN device and a set of peer
//! processes reachable over Unix stream sockets.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!   peers ──────▶ │ input: listener ─▶ handler per connection    │
//!  (input.sock)   │        source filter ─▶ WriterWorker ──────┐ │
//!                 │                                           ▼ │
//!                 │                                      TUN device
//!                 │                                           │ │
//!                 │ output: read loop ◀───────────────────────┘ │
//!                 │         Router (CIDR + TTL cache)           │
//!                 │           ├─▶ OutputWriter ─▶ WriterWorker ─┼──▶ peer A
//!                 │           └─▶ OutputWriter ─▶ WriterWorker ─┼──▶ peer B
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! Both sides share one [`Shutdown`] scope and one
//! [`BufferPool`](sock_packet::BufferPool). Writers never block producers:
//! packets are dropped when a queue is full or a peer link is down.

pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod output;
pub mod router;
pub mod shutdown;
pub mod writer;

pub use config::{Config, InputRoute, OutputRoute, TunSection, WriterConfig};
pub use engine::RouterEngine;
pub use error::{Error, Result};
pub use output::{LinkStatus, OutputWriter};
pub use router::Router;
pub use shutdown::Shutdown;
pub use writer::WriterWorker;
