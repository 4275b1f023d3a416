use std::fmt;

use chrono::{DateTime, Local, Offset};

use crate::flow::{Direction, FlowKey, TcpFlags};

/// Wall-clock stamp with microsecond resolution and the local UTC offset,
/// taken when the entry is built.
pub struct Stamp(DateTime<Local>);

impl Stamp {
    pub fn now() -> Self {
        Stamp(Local::now())
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let offset_hours = self.0.offset().fix().local_minus_utc() / 3600;
        write!(
            f,
            "[{} UTC{:+}]",
            self.0.format("%Y-%m-%d %H:%M:%S%.6f"),
            offset_hours
        )
    }
}

/// One captured TCP segment: length, leading bytes, flags. `key` is the
/// packet's own direction (src is the sender, not the flow initiator).
pub struct PacketEntry<'a> {
    stamp: Stamp,
    key: FlowKey,
    flags: TcpFlags,
    wire_len: usize,
    data: &'a [u8],
}

impl<'a> PacketEntry<'a> {
    pub fn new(key: FlowKey, flags: TcpFlags, wire_len: usize, data: &'a [u8]) -> Self {
        PacketEntry {
            stamp: Stamp::now(),
            key,
            flags,
            wire_len,
            data,
        }
    }
}

impl fmt::Display for PacketEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{},Len:{} TCP:{} | ",
            self.stamp, self.key, self.wire_len, self.flags
        )?;
        for byte in self.data.iter().take(64) {
            write!(f, "{byte:02x} ")?;
        }
        Ok(())
    }
}

/// Transport state machine activity for one flow.
pub struct StateEntry {
    stamp: Stamp,
    key: FlowKey,
    detail: String,
}

impl StateEntry {
    pub fn new(key: FlowKey, detail: String) -> Self {
        StateEntry {
            stamp: Stamp::now(),
            key,
            detail,
        }
    }
}

impl fmt::Display for StateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{},{}", self.stamp, self.key, self.detail)
    }
}

/// What the reassembler did with a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassmEvent {
    SegmentReceived,
    Buffered,
    DeliveredInOrder,
    DeliveredFromBuffer,
    DiscardDuplicate,
    DiscardOld,
    TrimOverlap,
    BufferReset,
    FinSignaled,
    SeqInitialized,
    IgnoredFin,
    IgnoredInit,
    BufferOverflow,
}

impl ReassmEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            ReassmEvent::SegmentReceived => "RECV",
            ReassmEvent::Buffered => "BUFF",
            ReassmEvent::DeliveredInOrder => "DLVR_ORD",
            ReassmEvent::DeliveredFromBuffer => "DLVR_BUF",
            ReassmEvent::DiscardDuplicate => "DROP_DUP",
            ReassmEvent::DiscardOld => "DROP_OLD",
            ReassmEvent::TrimOverlap => "TRIM",
            ReassmEvent::BufferReset => "RESET",
            ReassmEvent::FinSignaled => "FIN",
            ReassmEvent::SeqInitialized => "INIT",
            ReassmEvent::IgnoredFin => "IGN_FIN",
            ReassmEvent::IgnoredInit => "IGN_INIT",
            ReassmEvent::BufferOverflow => "OVERFLOW",
        }
    }
}

pub struct ReassmEntry {
    stamp: Stamp,
    key: FlowKey,
    dir: Direction,
    event: ReassmEvent,
    seq: u32,
    len: usize,
    expect: u32,
}

impl ReassmEntry {
    pub fn new(
        key: FlowKey,
        dir: Direction,
        event: ReassmEvent,
        seq: u32,
        len: usize,
        expect: u32,
    ) -> Self {
        ReassmEntry {
            stamp: Stamp::now(),
            key,
            dir,
            event,
            seq,
            len,
            expect,
        }
    }
}

impl fmt::Display for ReassmEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{},{} {}",
            self.stamp,
            self.key,
            self.dir,
            self.event.tag()
        )?;
        match self.event {
            ReassmEvent::SeqInitialized => write!(f, " | InitialSeq:{}", self.expect),
            ReassmEvent::BufferReset => write!(f, " | LastExpected:{}", self.expect),
            ReassmEvent::FinSignaled => write!(f, " | Expecting:{}", self.expect),
            ReassmEvent::IgnoredFin | ReassmEvent::IgnoredInit => {
                write!(f, " | Seq:{} Len:{}", self.seq, self.len)
            }
            _ => write!(
                f,
                " | Seq:{} Len:{} Expect:{}",
                self.seq, self.len, self.expect
            ),
        }
    }
}

/// Free-form analyzer diagnostics bound to a flow.
pub struct DebugEntry {
    stamp: Stamp,
    key: FlowKey,
    text: String,
}

impl DebugEntry {
    pub fn new(key: FlowKey, text: String) -> Self {
        DebugEntry {
            stamp: Stamp::now(),
            key,
            text,
        }
    }
}

impl fmt::Display for DebugEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{},{}", self.stamp, self.key, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Endpoint;
    use std::net::Ipv4Addr;

    fn key() -> FlowKey {
        FlowKey::new(
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 1),
                port: 1234,
            },
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 2),
                port: 443,
            },
        )
    }

    #[test]
    fn stamp_carries_microseconds_and_offset() {
        let s = Stamp::now().to_string();
        assert!(s.starts_with('['));
        assert!(s.contains("UTC"));
        // seconds fraction is 6 digits wide
        let frac = s.split('.').nth(1).unwrap();
        assert!(frac.chars().take(6).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn reassm_entry_formats_by_event() {
        let line = ReassmEntry::new(
            key(),
            Direction::ClientToServer,
            ReassmEvent::Buffered,
            1003,
            2,
            1001,
        )
        .to_string();
        assert!(line.contains("10.0.0.1:1234->10.0.0.2:443"));
        assert!(line.contains("BUFF | Seq:1003 Len:2 Expect:1001"));

        let init = ReassmEntry::new(
            key(),
            Direction::ClientToServer,
            ReassmEvent::SeqInitialized,
            0,
            0,
            1001,
        )
        .to_string();
        assert!(init.contains("INIT | InitialSeq:1001"));
    }

    #[test]
    fn packet_entry_dumps_leading_bytes() {
        let data = [0xde, 0xad, 0xbe, 0xef];
        let flags = TcpFlags {
            syn: true,
            ..TcpFlags::default()
        };
        let line = PacketEntry::new(key(), flags, 60, &data).to_string();
        assert!(line.contains("Len:60"));
        assert!(line.contains("TCP:S"));
        assert!(line.contains("de ad be ef"));
    }
}
