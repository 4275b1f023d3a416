use std::sync::Mutex;

use crate::analyzer::Analyzer;
use crate::flow::{Direction, FlowKey};
use crate::tracelog::{self, DebugEntry, Sink};

use super::{ContentType, Extract, Record, RecordBuffer, Tls12Machine, Tls12State};
use super::{HandshakeType, Step};

/// Tracks the cleartext phase of a TLS session riding on one flow: frames
/// records out of both reassembled directions and drives the TLS 1.2
/// handshake machine. No payload is decrypted; once a direction switches
/// ciphers only record boundaries and ChangeCipherSpec remain visible.
pub struct TlsAnalyzer {
    key: FlowKey,
    inner: Mutex<Inner>,
    log: Sink,
}

struct Inner {
    client_buf: RecordBuffer,
    server_buf: RecordBuffer,
    machine: Tls12Machine,
}

impl TlsAnalyzer {
    pub fn new(key: FlowKey) -> Self {
        TlsAnalyzer {
            key,
            inner: Mutex::new(Inner {
                client_buf: RecordBuffer::new(),
                server_buf: RecordBuffer::new(),
                machine: Tls12Machine::new(),
            }),
            log: tracelog::get("tls"),
        }
    }

    pub fn state(&self) -> Tls12State {
        self.inner.lock().unwrap().machine.state()
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.inner.lock().unwrap().machine.is_complete()
    }

    fn handle_record(&self, inner: &mut Inner, dir: Direction, record: Record) {
        match record.content_type {
            Some(ContentType::Handshake) => {
                let msg = record.body.first().copied().and_then(HandshakeType::from_u8);
                let step = inner.machine.process_handshake(dir, msg);
                self.log_step(dir, describe_handshake(&record, msg), step);
            }
            Some(ContentType::ChangeCipherSpec) => {
                let step = inner.machine.process_change_cipher_spec(dir);
                self.log_step(dir, "ChangeCipherSpec".to_string(), step);
            }
            Some(ContentType::Alert) => {
                let (level, desc) = match record.body[..] {
                    [level, desc, ..] => (level, desc),
                    _ => (0, 0),
                };
                self.log
                    .record(DebugEntry::new(self.key, format!("{dir} Alert {level}/{desc}")));
            }
            // opaque to a handshake tap, as are record types this crate
            // does not model
            Some(ContentType::ApplicationData) | Some(ContentType::Heartbeat) | None => {}
        }
    }

    fn log_step(&self, dir: Direction, what: String, step: Step) {
        if !self.log.is_active() {
            return;
        }
        let text = if step.valid {
            format!("{dir} {what}: {} -> {}", step.from, step.to)
        } else {
            format!("{dir} {what}: invalid in {}, -> {}", step.from, step.to)
        };
        self.log.record(DebugEntry::new(self.key, text));
    }
}

fn describe_handshake(record: &Record, msg: Option<HandshakeType>) -> String {
    match msg {
        Some(msg) => msg.to_string(),
        None => format!(
            "handshake type {} ({} bytes)",
            record.body.first().copied().unwrap_or(0),
            record.body.len()
        ),
    }
}

impl Analyzer for TlsAnalyzer {
    fn on_data(&self, dir: Direction, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();

        let buf = match dir {
            Direction::ClientToServer => &mut inner.client_buf,
            Direction::ServerToClient => &mut inner.server_buf,
        };
        buf.extend(data);

        loop {
            let buf = match dir {
                Direction::ClientToServer => &mut inner.client_buf,
                Direction::ServerToClient => &mut inner.server_buf,
            };
            match buf.try_extract() {
                Extract::Record(record) => self.handle_record(&mut inner, dir, record),
                Extract::NeedMore => break,
                Extract::Invalid(header) => {
                    let hex: String = header.iter().map(|b| format!("{b:02x} ")).collect();
                    self.log.record(DebugEntry::new(
                        self.key,
                        format!("{dir} bad record header: {}", hex.trim_end()),
                    ));
                    break;
                }
            }
        }
    }

    fn on_reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.client_buf.reset();
        inner.server_buf.reset();
        inner.machine.reset();
        self.log
            .record(DebugEntry::new(self.key, "flow reset, analyzer cleared".to_string()));
    }

    fn on_closed(&self) {
        let state = self.state();
        self.log
            .record(DebugEntry::new(self.key, format!("stream closed in {state}")));
    }
}
