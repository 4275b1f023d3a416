use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analyzer::Analyzer;
use crate::flow::{Direction, FlowKey};
use crate::tracelog::{self, ReassmEntry, ReassmEvent, Sink};

/// Cap on buffered out-of-order bytes per direction. A sender that opens a
/// hole and floods past it cannot grow the buffer without bound; the
/// segment furthest in the future is evicted first.
const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Reconstructs one direction of one flow into an in-order, deduplicated
/// byte stream and fans deliveries out to the flow's analyzers.
///
/// Not thread-safe; the flow table serializes entry per flow. Anomalies
/// (old data, duplicates, overlaps, data after FIN) are logged and
/// swallowed — only a RST tears state down, and that arrives from outside
/// via [`Reassembler::reset`].
pub struct Reassembler {
    key: FlowKey,
    dir: Direction,
    next_seq: u32,
    initialized: bool,
    fin_seen: bool,
    buffered: BTreeMap<u32, Vec<u8>>,
    buffered_bytes: usize,
    analyzers: Vec<Arc<dyn Analyzer>>,
    log: Sink,
}

impl Reassembler {
    /// `key` is the directional view (src = this direction's sender), used
    /// only for logging.
    pub fn new(key: FlowKey, dir: Direction, analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        Reassembler {
            key,
            dir,
            next_seq: 0,
            initialized: false,
            fin_seen: false,
            buffered: BTreeMap::new(),
            buffered_bytes: 0,
            analyzers,
            log: tracelog::get("reassm"),
        }
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_closed(&self) -> bool {
        self.fin_seen
    }

    #[cfg(test)]
    pub(crate) fn buffered_segments(&self) -> usize {
        self.buffered.len()
    }

    /// Record the direction's initial sequence number. The SYN itself
    /// consumes one number, so the first payload byte is expected at
    /// `isn + 1`. Idempotent: only the first call counts.
    pub fn set_initial_seq(&mut self, isn: u32) {
        if self.initialized {
            return;
        }
        self.next_seq = isn.wrapping_add(1);
        self.initialized = true;
        self.log_event(ReassmEvent::SeqInitialized, 0, 0);
        self.deliver_contiguous();
    }

    /// Drop all reassembly state after a RST. Analyzer notification is the
    /// flow's job so it happens once, not once per direction.
    pub fn reset(&mut self) {
        if self.initialized || !self.buffered.is_empty() {
            self.log_event(ReassmEvent::BufferReset, 0, 0);
        }
        self.buffered.clear();
        self.buffered_bytes = 0;
        self.next_seq = 0;
        self.initialized = false;
        self.fin_seen = false;
    }

    /// The direction's stream ended. Logged and fanned out once; a final
    /// contiguous-delivery pass drains anything the FIN was waiting behind.
    pub fn fin_received(&mut self) {
        if self.fin_seen {
            return;
        }
        self.fin_seen = true;
        self.log_event(ReassmEvent::FinSignaled, 0, 0);
        for analyzer in &self.analyzers {
            analyzer.on_closed();
        }
        self.deliver_contiguous();
    }

    /// Feed one observed segment. The hot path.
    pub fn process(&mut self, seq: u32, payload: &[u8], _syn: bool, fin: bool) {
        self.log_event(ReassmEvent::SegmentReceived, seq, payload.len());

        if !self.initialized {
            self.log_event(ReassmEvent::IgnoredInit, seq, payload.len());
            return;
        }

        let original_seq = seq;
        let original_len = payload.len();

        let mut seq = seq;
        let mut payload = payload;

        if !payload.is_empty() {
            let end_seq = seq.wrapping_add(payload.len() as u32);
            if !seq_gt(end_seq, self.next_seq) {
                self.log_event(ReassmEvent::DiscardOld, seq, payload.len());
                return;
            }

            if seq_gt(self.next_seq, seq) {
                let overlap = self.next_seq.wrapping_sub(seq) as usize;
                if overlap >= payload.len() {
                    self.log_event(ReassmEvent::DiscardDuplicate, seq, payload.len());
                    return;
                }
                payload = &payload[overlap..];
                seq = self.next_seq;
                self.log_event(ReassmEvent::TrimOverlap, original_seq, original_len);
            }
        }

        if self.fin_seen && !payload.is_empty() {
            self.log_event(ReassmEvent::IgnoredFin, seq, payload.len());
            payload = &[];
        }

        if !payload.is_empty() && seq == self.next_seq {
            self.log_event(ReassmEvent::DeliveredInOrder, seq, payload.len());
            self.notify_data(payload);
            self.next_seq = self.next_seq.wrapping_add(payload.len() as u32);
            self.deliver_contiguous();
        } else if !payload.is_empty() && seq_gt(seq, self.next_seq) {
            self.buffer_segment(seq, payload);
        }

        // The FIN occupies the sequence slot after the segment's payload.
        // It is consumed only when that slot is exactly what we expect;
        // otherwise it stays pending until a retransmission lines up.
        if fin {
            let fin_seq = original_seq.wrapping_add(original_len as u32);
            if fin_seq == self.next_seq && !self.fin_seen {
                self.fin_received();
                self.next_seq = self.next_seq.wrapping_add(1);
            }
        }
    }

    fn buffer_segment(&mut self, seq: u32, payload: &[u8]) {
        self.log_event(ReassmEvent::Buffered, seq, payload.len());

        if let Some(replaced) = self.buffered.insert(seq, payload.to_vec()) {
            self.buffered_bytes -= replaced.len();
        }
        self.buffered_bytes += payload.len();

        while self.buffered_bytes > MAX_BUFFERED_BYTES {
            let furthest = self
                .buffered
                .keys()
                .copied()
                .max_by_key(|s| s.wrapping_sub(self.next_seq));
            let Some(start) = furthest else { break };
            if let Some(dropped) = self.buffered.remove(&start) {
                self.buffered_bytes -= dropped.len();
                self.log_event(ReassmEvent::BufferOverflow, start, dropped.len());
            }
        }
    }

    /// Drain buffered segments that have become deliverable. A segment
    /// buffered before a larger in-order delivery may now start behind
    /// `next_seq`; such heads are trimmed exactly like a fresh arrival, so
    /// no buffered start ever stays at or before `next_seq`.
    fn deliver_contiguous(&mut self) {
        if !self.initialized {
            return;
        }

        loop {
            if let Some(data) = self.buffered.remove(&self.next_seq) {
                self.buffered_bytes -= data.len();
                self.log_event(ReassmEvent::DeliveredFromBuffer, self.next_seq, data.len());
                self.notify_data(&data);
                self.next_seq = self.next_seq.wrapping_add(data.len() as u32);
                continue;
            }

            let stale = self
                .buffered
                .keys()
                .copied()
                .find(|&start| seq_ge(self.next_seq, start));
            let Some(start) = stale else { break };
            let Some(data) = self.buffered.remove(&start) else {
                break;
            };
            self.buffered_bytes -= data.len();

            let end_seq = start.wrapping_add(data.len() as u32);
            if !seq_gt(end_seq, self.next_seq) {
                self.log_event(ReassmEvent::DiscardOld, start, data.len());
                continue;
            }

            let overlap = self.next_seq.wrapping_sub(start) as usize;
            self.log_event(ReassmEvent::TrimOverlap, start, data.len());
            let rest = &data[overlap..];
            self.log_event(ReassmEvent::DeliveredFromBuffer, self.next_seq, rest.len());
            self.notify_data(rest);
            self.next_seq = self.next_seq.wrapping_add(rest.len() as u32);
        }
    }

    fn notify_data(&self, data: &[u8]) {
        for analyzer in &self.analyzers {
            analyzer.on_data(self.dir, data);
        }
    }

    fn log_event(&self, event: ReassmEvent, seq: u32, len: usize) {
        self.log.record(ReassmEntry::new(
            self.key,
            self.dir,
            event,
            seq,
            len,
            self.next_seq,
        ));
    }
}

/// `true` iff `a` lies strictly after `b` in 32-bit sequence space. The
/// signed difference keeps comparisons correct across the 2^31 wrap, per
/// the usual serial number arithmetic.
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// `true` iff `a` is at or after `b` in sequence space.
pub fn seq_ge(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Endpoint;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Data(Direction, Vec<u8>),
        Closed,
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn deliveries(&self) -> Vec<Vec<u8>> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::Data(_, bytes) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        }

        fn closed_count(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, Event::Closed))
                .count()
        }
    }

    impl Analyzer for Recorder {
        fn on_data(&self, dir: Direction, data: &[u8]) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Data(dir, data.to_vec()));
        }

        fn on_closed(&self) {
            self.events.lock().unwrap().push(Event::Closed);
        }
    }

    fn reassembler() -> (Reassembler, Arc<Recorder>) {
        let key = FlowKey::new(
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 1),
                port: 40000,
            },
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 2),
                port: 443,
            },
        );
        let recorder = Arc::new(Recorder::default());
        let reassm = Reassembler::new(
            key,
            Direction::ClientToServer,
            vec![recorder.clone() as Arc<dyn Analyzer>],
        );
        (reassm, recorder)
    }

    #[test]
    fn ignores_data_before_initialization() {
        let (mut r, rec) = reassembler();
        r.process(1000, b"hello", false, false);
        assert!(rec.deliveries().is_empty());
        assert_eq!(r.buffered_segments(), 0);
    }

    #[test]
    fn set_initial_seq_is_idempotent() {
        let (mut r, _) = reassembler();
        r.set_initial_seq(1000);
        assert_eq!(r.next_seq(), 1001);
        r.set_initial_seq(5000);
        assert_eq!(r.next_seq(), 1001);
    }

    #[test]
    fn out_of_order_delivery() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        r.process(1003, b"CC", false, false);
        assert!(rec.deliveries().is_empty());
        assert_eq!(r.buffered_segments(), 1);

        r.process(1001, b"AA", false, false);
        assert_eq!(rec.deliveries(), vec![b"AA".to_vec(), b"CC".to_vec()]);
        assert_eq!(r.next_seq(), 1005);
        assert_eq!(r.buffered_segments(), 0);
    }

    #[test]
    fn pure_duplicate_is_discarded() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        r.process(1001, b"AABB", false, false);
        r.process(1001, b"AABB", false, false);

        assert_eq!(rec.deliveries(), vec![b"AABB".to_vec()]);
        assert_eq!(r.next_seq(), 1005);
    }

    #[test]
    fn partial_overlap_is_trimmed() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        r.process(1001, b"AABB", false, false);
        // overlaps the delivered range by two bytes
        r.process(1003, b"BBCC", false, false);

        assert_eq!(rec.deliveries(), vec![b"AABB".to_vec(), b"CC".to_vec()]);
        assert_eq!(r.next_seq(), 1007);
    }

    #[test]
    fn sequence_numbers_wrap_through_zero() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(0xFFFF_FFF0);
        assert_eq!(r.next_seq(), 0xFFFF_FFF1);

        let first: Vec<u8> = (1..=8).collect();
        let second: Vec<u8> = (9..=16).collect();
        r.process(0xFFFF_FFF1, &first, false, false);
        r.process(0xFFFF_FFF9, &second, false, false);

        assert_eq!(rec.deliveries(), vec![first, second]);
        assert_eq!(r.next_seq(), 1);
    }

    #[test]
    fn old_segment_never_reaches_analyzers() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);
        r.process(1001, b"AABBCC", false, false);

        // seq + len entirely at or before next_seq
        r.process(1001, b"AABB", false, false);
        r.process(1005, b"CC", false, false);

        assert_eq!(rec.deliveries(), vec![b"AABBCC".to_vec()]);
    }

    #[test]
    fn reset_clears_everything() {
        let (mut r, _) = reassembler();
        r.set_initial_seq(1000);
        r.process(1010, b"future", false, false);
        assert_eq!(r.buffered_segments(), 1);

        r.reset();
        assert!(!r.is_initialized());
        assert!(!r.is_closed());
        assert_eq!(r.buffered_segments(), 0);

        // back to the uninitialized behaviour
        r.process(1001, b"XX", false, false);
        assert_eq!(r.buffered_segments(), 0);
    }

    #[test]
    fn in_order_fin_closes_the_stream() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        r.process(1001, b"AB", false, true);
        assert!(r.is_closed());
        assert_eq!(rec.closed_count(), 1);
        // payload advanced by two, FIN by one
        assert_eq!(r.next_seq(), 1004);

        // data after FIN is ignored
        r.process(1004, b"XY", false, false);
        assert_eq!(rec.deliveries(), vec![b"AB".to_vec()]);
    }

    #[test]
    fn out_of_order_fin_is_deferred() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        // FIN arrives with a hole in front of it: not consumed yet
        r.process(1003, b"CD", false, true);
        assert!(!r.is_closed());

        r.process(1001, b"AB", false, false);
        assert_eq!(rec.deliveries(), vec![b"AB".to_vec(), b"CD".to_vec()]);
        assert!(!r.is_closed());

        // the retransmitted bare FIN lines up and is consumed
        r.process(1005, b"", false, true);
        assert!(r.is_closed());
        assert_eq!(r.next_seq(), 1006);
        assert_eq!(rec.closed_count(), 1);
    }

    #[test]
    fn fin_fires_once() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);
        r.process(1001, b"", false, true);
        r.process(1001, b"", false, true);
        assert_eq!(rec.closed_count(), 1);
    }

    #[test]
    fn rebuffered_start_overwrites() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        r.process(1003, b"xx", false, false);
        r.process(1003, b"CCDD", false, false);
        assert_eq!(r.buffered_segments(), 1);

        r.process(1001, b"AB", false, false);
        assert_eq!(rec.deliveries(), vec![b"AB".to_vec(), b"CCDD".to_vec()]);
    }

    #[test]
    fn overrun_buffered_segment_is_trimmed_at_delivery() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        // buffered segment 1005..1009, then an in-order run 1001..1007
        // overruns its start
        r.process(1005, b"EFGH", false, false);
        r.process(1001, b"ABCDEF", false, false);

        assert_eq!(
            rec.deliveries(),
            vec![b"ABCDEF".to_vec(), b"GH".to_vec()],
            "only the unseen tail of the buffered segment is delivered"
        );
        assert_eq!(r.next_seq(), 1009);
        assert_eq!(r.buffered_segments(), 0);
    }

    #[test]
    fn buffer_cap_evicts_furthest_segment() {
        let (mut r, rec) = reassembler();
        r.set_initial_seq(1000);

        let chunk = vec![0u8; 600 * 1024];
        r.process(2000, &chunk, false, false);
        r.process(700_000, &chunk, false, false);
        // second insert blew the cap; the far segment is gone
        assert_eq!(r.buffered_segments(), 1);

        r.process(1001, &vec![1u8; 999], false, false);
        // 1001..2000 then the surviving buffered chunk at 2000
        assert_eq!(rec.deliveries().len(), 2);
        assert_eq!(r.next_seq(), 2000 + 600 * 1024);
    }

    #[test]
    fn seq_compare_helpers() {
        assert!(seq_gt(2, 1));
        assert!(!seq_gt(1, 1));
        assert!(seq_ge(1, 1));
        // across the wrap boundary
        assert!(seq_gt(5, 0xFFFF_FFF0));
        assert!(!seq_gt(0xFFFF_FFF0, 5));
        assert!(seq_ge(0, 0xFFFF_FFFF));
    }
}
