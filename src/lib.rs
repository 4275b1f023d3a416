//! flowtap — a passive, read-only TCP traffic analyzer.
//!
//! Frames come in from a live capture source; every bidirectional flow is
//! tracked through a per-endpoint TCP state machine, its byte streams are
//! reassembled in sequence order, and the reassembled bytes fan out to
//! pluggable analyzers. Built-ins: a tap that dumps deliveries, and a TLS
//! analyzer that follows the cleartext handshake phase.
//!
//! Nothing is ever injected, modified or terminated: flowtap observes.

mod err;
pub use err::*;

pub mod analyzer;
pub mod console;
pub mod flow;
pub mod processor;
pub mod reassm;
pub mod tls;
pub mod tracelog;

pub use console::ConsoleDisplay;
pub use flow::{FlowTable, FlowTableConfig};
pub use processor::PacketProcessor;
