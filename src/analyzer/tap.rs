use std::fmt::Write as _;

use crate::flow::{Direction, FlowKey};
use crate::tracelog::{self, DebugEntry, Sink};

use super::Analyzer;

/// Debug analyzer that dumps every reassembled delivery to the `analyzer`
/// sink, hex alongside ASCII. Useful for eyeballing what the reassembler
/// actually handed out.
pub struct TapAnalyzer {
    key: FlowKey,
    log: Sink,
}

impl TapAnalyzer {
    pub fn new(key: FlowKey) -> Self {
        TapAnalyzer {
            key,
            log: tracelog::get("analyzer"),
        }
    }

    fn dump(data: &[u8]) -> String {
        let mut out = String::new();
        for (i, chunk) in data.chunks(16).enumerate() {
            let _ = write!(out, "\n{:04x}: ", i * 16);
            for byte in chunk {
                let _ = write!(out, "{byte:02x} ");
            }
        }
        out.push_str("\nascii: ");
        for &byte in data {
            out.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        out
    }
}

impl Analyzer for TapAnalyzer {
    fn on_data(&self, dir: Direction, data: &[u8]) {
        if !self.log.is_active() {
            return;
        }
        let text = format!("{dir} {} bytes{}", data.len(), Self::dump(data));
        self.log.record(DebugEntry::new(self.key, text));
    }

    fn on_reset(&self) {
        self.log
            .record(DebugEntry::new(self.key, "flow reset".to_string()));
    }

    fn on_closed(&self) {
        self.log
            .record(DebugEntry::new(self.key, "stream closed".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_pairs_hex_with_ascii() {
        let text = TapAnalyzer::dump(b"GET / HTTP\x00");
        assert!(text.contains("0000: 47 45 54 20 2f 20 48 54 54 50 00"));
        assert!(text.contains("ascii: GET / HTTP."));
    }

    #[test]
    fn dump_wraps_at_sixteen_bytes() {
        let text = TapAnalyzer::dump(&[0u8; 20]);
        assert!(text.contains("0000:"));
        assert!(text.contains("0010:"));
    }
}
