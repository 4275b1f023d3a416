use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::analyzer;
use crate::tracelog::{self, Sink, StateEntry};

use super::state::CleanupConfig;
use super::{Flow, FlowKey, TcpFlags, TcpState};

/// Tunables for the table and its sweeper.
#[derive(Debug, Clone)]
pub struct FlowTableConfig {
    pub cleanup: CleanupConfig,
    pub sweep_interval: Duration,
    /// Analyzer names instantiated for every new flow.
    pub analyzers: Vec<String>,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        FlowTableConfig {
            cleanup: CleanupConfig::default(),
            sweep_interval: Duration::from_secs(5),
            analyzers: vec!["reassm".to_string(), "tls".to_string()],
        }
    }
}

/// Snapshot row for the console display.
#[derive(Debug, Clone)]
pub struct FlowSummary {
    pub id: u64,
    pub key: FlowKey,
    pub client: TcpState,
    pub server: TcpState,
}

/// Process-wide map of live flows.
///
/// The map lock is held only while looking a flow up, inserting one or
/// removing one; the flow itself is processed under its own lock with the
/// map lock released, so analyzer callbacks never run inside it.
pub struct FlowTable {
    flows: Mutex<HashMap<FlowKey, Arc<Mutex<Flow>>>>,
    reclaim: Mutex<Vec<FlowKey>>,
    next_id: AtomicU64,
    config: FlowTableConfig,
    log: Sink,
}

impl FlowTable {
    pub fn new(config: FlowTableConfig) -> Self {
        FlowTable {
            flows: Mutex::new(HashMap::new()),
            reclaim: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            config,
            log: tracelog::get("tcp"),
        }
    }

    pub fn len(&self) -> usize {
        self.flows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn reclaim_len(&self) -> usize {
        self.reclaim.lock().unwrap().len()
    }

    /// Route one decoded segment. Creates a flow only for an opening
    /// segment; anything mid-stream without a flow is refused, because a
    /// pickup with an unknown ISN could never be reassembled honestly.
    pub fn process(&self, pkt_key: FlowKey, flags: TcpFlags, seq: u32, payload: &[u8], now: Instant) {
        let flow = {
            let mut flows = self.flows.lock().unwrap();
            match flows.get(&pkt_key) {
                Some(existing) => existing.clone(),
                None => {
                    if !flags.is_opening() {
                        self.log.record(StateEntry::new(
                            pkt_key,
                            format!("no flow for flags({flags}), dropped"),
                        ));
                        return;
                    }

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let analyzers = analyzer::create_set(&self.config.analyzers, &pkt_key);
                    let created = Arc::new(Mutex::new(Flow::new(pkt_key, id, analyzers, now)));
                    flows.insert(pkt_key, created.clone());
                    created
                }
            }
        };

        let signal = {
            let mut flow = flow.lock().unwrap();
            flow.handle(&pkt_key, flags, seq, payload, now);
            flow.cleanup_signal(flags)
        };
        if signal {
            self.reclaim.lock().unwrap().push(pkt_key);
        }
    }

    /// One sweeper pass: re-check every queued flow against the cleanup
    /// predicate, erase the eligible ones, keep the rest queued (a
    /// TIME_WAIT flow becomes eligible only once its MSL elapses), then
    /// reap flows that went idle without ever signalling.
    pub fn sweep_once(&self, now: Instant) {
        let queued = std::mem::take(&mut *self.reclaim.lock().unwrap());
        if queued.is_empty() && self.is_empty() {
            return;
        }

        let mut still_waiting = Vec::new();
        let mut removed = 0usize;
        {
            let mut flows = self.flows.lock().unwrap();
            for key in queued {
                let eligible = flows
                    .get(&key)
                    .map(|f| f.lock().unwrap().should_clean_up(&self.config.cleanup, now));
                match eligible {
                    Some(true) => {
                        flows.remove(&key);
                        removed += 1;
                    }
                    Some(false) => still_waiting.push(key),
                    None => {}
                }
            }

            let idle = self.config.cleanup.idle;
            flows.retain(|_, f| {
                let keep = now.duration_since(f.lock().unwrap().last_activity()) <= idle;
                if !keep {
                    removed += 1;
                }
                keep
            });
        }

        if !still_waiting.is_empty() {
            let mut reclaim = self.reclaim.lock().unwrap();
            // the queue may have gained new entries meanwhile; keep both,
            // duplicates are harmless to the predicate re-check
            reclaim.extend(still_waiting);
        }

        if removed > 0 {
            debug!("sweeper reclaimed {removed} flow(s)");
        }
    }

    /// The most recently created flows, newest last.
    pub fn latest(&self, n: usize) -> Vec<FlowSummary> {
        let flows = self.flows.lock().unwrap();
        let mut rows: Vec<FlowSummary> = flows
            .values()
            .map(|f| {
                let flow = f.lock().unwrap();
                FlowSummary {
                    id: flow.id(),
                    key: *flow.key(),
                    client: flow.client_state(),
                    server: flow.server_state(),
                }
            })
            .collect();
        rows.sort_unstable_by_key(|row| row.id);
        if rows.len() > n {
            rows.drain(..rows.len() - n);
        }
        rows
    }
}

/// Run the reclamation loop until `running` goes false: one worker
/// thread, one shared flag, plain sleeps between passes.
pub fn spawn_sweeper(
    table: Arc<FlowTable>,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!(
            "sweeper running every {:?}",
            table.config.sweep_interval
        );
        while running.load(Ordering::Acquire) {
            table.sweep_once(Instant::now());
            thread::sleep(table.config.sweep_interval);
        }
        info!("sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Endpoint;
    use std::net::Ipv4Addr;

    fn key(port: u16) -> FlowKey {
        FlowKey::new(
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 1),
                port,
            },
            Endpoint {
                addr: Ipv4Addr::new(10, 0, 0, 2),
                port: 443,
            },
        )
    }

    fn flags(s: &str) -> TcpFlags {
        TcpFlags {
            syn: s.contains('S'),
            ack: s.contains('A'),
            fin: s.contains('F'),
            rst: s.contains('R'),
            psh: s.contains('P'),
            urg: s.contains('U'),
        }
    }

    fn table() -> FlowTable {
        FlowTable::new(FlowTableConfig {
            analyzers: vec![],
            ..FlowTableConfig::default()
        })
    }

    #[test]
    fn only_an_opening_segment_creates_a_flow() {
        let t = table();
        let now = Instant::now();

        t.process(key(1000), flags("A"), 55, b"stray", now);
        t.process(key(1000), flags("SA"), 55, b"", now);
        t.process(key(1000), flags("F"), 55, b"", now);
        assert!(t.is_empty());

        t.process(key(1000), flags("S"), 100, b"", now);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn both_directions_reach_the_same_flow() {
        let t = table();
        let now = Instant::now();
        let k = key(2000);

        t.process(k, flags("S"), 100, b"", now);
        t.process(k.reverse(), flags("SA"), 500, b"", now);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn reset_flow_is_reclaimed_by_the_next_sweep() {
        let t = table();
        let now = Instant::now();
        let k = key(3000);

        t.process(k, flags("S"), 100, b"", now);
        t.process(k, flags("R"), 101, b"", now);
        assert_eq!(t.len(), 1);
        assert!(t.reclaim_len() > 0);

        t.sweep_once(now);
        assert!(t.is_empty());
        assert_eq!(t.reclaim_len(), 0);
    }

    #[test]
    fn time_wait_flow_waits_out_its_msl() {
        let t = FlowTable::new(FlowTableConfig {
            cleanup: CleanupConfig {
                msl: Duration::from_secs(60),
                idle: Duration::from_secs(600),
            },
            analyzers: vec![],
            ..FlowTableConfig::default()
        });
        let now = Instant::now();
        let k = key(4000);

        // full close: client lands in TIME_WAIT
        t.process(k, flags("S"), 100, b"", now);
        t.process(k.reverse(), flags("SA"), 500, b"", now);
        t.process(k, flags("A"), 101, b"", now);
        t.process(k, flags("FA"), 101, b"", now);
        t.process(k.reverse(), flags("FA"), 501, b"", now);
        t.process(k, flags("A"), 102, b"", now);

        // before the MSL the flow survives but stays queued
        t.sweep_once(now + Duration::from_secs(30));
        assert_eq!(t.len(), 1);
        assert!(t.reclaim_len() > 0);

        // after the MSL it is gone
        t.sweep_once(now + Duration::from_secs(61));
        assert!(t.is_empty());
    }

    #[test]
    fn idle_flow_is_reclaimed_without_a_signal() {
        let t = FlowTable::new(FlowTableConfig {
            cleanup: CleanupConfig {
                msl: Duration::from_secs(60),
                idle: Duration::from_secs(60),
            },
            analyzers: vec![],
            ..FlowTableConfig::default()
        });
        let now = Instant::now();

        // half-open: a SYN and nothing else, never queued for cleanup
        t.process(key(5000), flags("S"), 100, b"", now);
        assert_eq!(t.reclaim_len(), 0);

        t.sweep_once(now + Duration::from_secs(59));
        assert_eq!(t.len(), 1);
        t.sweep_once(now + Duration::from_secs(61));
        assert!(t.is_empty());
    }

    #[test]
    fn latest_lists_newest_flows_in_id_order() {
        let t = table();
        let now = Instant::now();

        for port in 1..=12u16 {
            t.process(key(port), flags("S"), 100, b"", now);
        }

        let rows = t.latest(10);
        assert_eq!(rows.len(), 10);
        assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(rows.last().map(|r| r.id), Some(12));
    }
}
