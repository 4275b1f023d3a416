use std::sync::Arc;
use std::time::Instant;

use etherparse::{Ipv4HeaderSlice, TcpHeaderSlice};

use crate::flow::{Endpoint, FlowKey, FlowTable, TcpFlags};
use crate::tracelog::{self, DebugEntry, PacketEntry, Sink};

/// Link-layer header bytes to skip. Plain Ethernet II.
pub const LINK_HEADER_LEN: usize = 14;

/// Smallest frame worth decoding: Ethernet + minimal IPv4 + minimal TCP.
pub const MIN_FRAME_LEN: usize = 54;

const IP_PROTO_TCP: u8 = 6;

/// Thin adapter between the capture source and the flow table: validate
/// the frame, decode the headers, clamp the payload to what was actually
/// captured, dispatch.
pub struct PacketProcessor {
    table: Arc<FlowTable>,
    log: Sink,
}

impl PacketProcessor {
    pub fn new(table: Arc<FlowTable>) -> Self {
        PacketProcessor {
            table,
            log: tracelog::get("packet"),
        }
    }

    /// Feed one captured frame. `wire_len` is the length on the wire,
    /// which may exceed `frame.len()` when the capture was truncated.
    /// Malformed or non-TCP frames are dropped without comment; they are
    /// background noise, not errors.
    pub fn handle_frame(&self, frame: &[u8], wire_len: usize, now: Instant) {
        if frame.len() < MIN_FRAME_LEN {
            return;
        }

        let Ok(ip4h) = Ipv4HeaderSlice::from_slice(&frame[LINK_HEADER_LEN..]) else {
            return;
        };
        if ip4h.protocol() != IP_PROTO_TCP {
            return;
        }

        let ip_header_len = ip4h.slice().len();
        let Ok(tcph) = TcpHeaderSlice::from_slice(&frame[LINK_HEADER_LEN + ip_header_len..])
        else {
            return;
        };
        let tcp_header_len = tcph.slice().len();
        let headers = LINK_HEADER_LEN + ip_header_len + tcp_header_len;

        // The IP total is what the sender claims; the capture is what we
        // hold. Trusting the claim on a truncated capture would read past
        // the frame, so the payload is clamped to the smaller of the two.
        let declared =
            (ip4h.total_len() as usize).saturating_sub(ip_header_len + tcp_header_len);
        let available = frame.len() - headers;
        let payload_len = declared.min(available);

        let key = FlowKey::new(
            Endpoint {
                addr: ip4h.source_addr(),
                port: tcph.source_port(),
            },
            Endpoint {
                addr: ip4h.destination_addr(),
                port: tcph.destination_port(),
            },
        );
        let flags = TcpFlags {
            syn: tcph.syn(),
            ack: tcph.ack(),
            fin: tcph.fin(),
            rst: tcph.rst(),
            psh: tcph.psh(),
            urg: tcph.urg(),
        };

        if declared > available {
            self.log.record(DebugEntry::new(
                key,
                format!("truncated capture: declared {declared} payload bytes, captured {available}"),
            ));
        }

        self.log
            .record(PacketEntry::new(key, flags, wire_len, frame));

        let payload = &frame[headers..headers + payload_len];
        self.table
            .process(key, flags, tcph.sequence_number(), payload, now);
    }
}
