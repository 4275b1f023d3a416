use std::sync::Arc;
use std::time::Instant;

use crate::analyzer::Analyzer;
use crate::reassm::Reassembler;
use crate::tracelog::{self, Sink, StateEntry};

use super::state::{
    is_violation, next_state_on_receive, next_state_on_send, CleanupConfig, ConnState, TcpState,
};
use super::{Direction, FlowKey, TcpFlags};

/// One tracked connection: both endpoint state machines, one reassembler
/// per direction, and the analyzers shared between them.
///
/// A Flow is only ever mutated under its own lock (the table hands out
/// `Arc<Mutex<Flow>>`), so everything below is single-threaded.
pub struct Flow {
    key: FlowKey,
    id: u64,
    client: ConnState,
    server: ConnState,
    last_activity: Instant,
    client_reassm: Reassembler,
    server_reassm: Reassembler,
    analyzers: Vec<Arc<dyn Analyzer>>,
    reset_seen: bool,
    log: Sink,
}

impl Flow {
    /// `key` is the opening segment's direction: src is the initiator.
    /// The initiator starts in SYN_SENT (it just sent the SYN that created
    /// us), the responder in LISTEN.
    pub fn new(key: FlowKey, id: u64, analyzers: Vec<Arc<dyn Analyzer>>, now: Instant) -> Self {
        let log = tracelog::get("tcp");
        log.record(StateEntry::new(
            key,
            format!("flow {id} created, cli:SYN_SENT srv:LISTEN"),
        ));

        Flow {
            key,
            id,
            client: ConnState::new(TcpState::SynSent, now),
            server: ConnState::new(TcpState::Listen, now),
            last_activity: now,
            client_reassm: Reassembler::new(key, Direction::ClientToServer, analyzers.clone()),
            server_reassm: Reassembler::new(
                key.reverse(),
                Direction::ServerToClient,
                analyzers.clone(),
            ),
            analyzers,
            reset_seen: false,
            log,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    pub fn client_state(&self) -> TcpState {
        self.client.state
    }

    pub fn server_state(&self) -> TcpState {
        self.server.state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_from_client(&self, pkt_key: &FlowKey) -> bool {
        pkt_key.src == self.key.src
    }

    /// Process one observed segment belonging to this flow.
    pub fn handle(&mut self, pkt_key: &FlowKey, flags: TcpFlags, seq: u32, payload: &[u8], now: Instant) {
        let from_client = self.is_from_client(pkt_key);
        let dir = if from_client {
            Direction::ClientToServer
        } else {
            Direction::ServerToClient
        };

        // A SYN pins the direction's initial sequence number; repeats are
        // absorbed by set_initial_seq's idempotence.
        if flags.syn {
            self.reassm_mut(dir).set_initial_seq(seq);
        }

        if !payload.is_empty() || flags.syn || flags.fin {
            self.reassm_mut(dir).process(seq, payload, flags.syn, flags.fin);
        }

        if flags.rst {
            self.handle_reset();
        }

        self.update_states(from_client, flags, now);
        self.last_activity = now;
    }

    /// Whether this packet leaves the flow worth queueing for the sweeper.
    pub fn cleanup_signal(&self, flags: TcpFlags) -> bool {
        flags.fin
            || flags.rst
            || (self.client.state == TcpState::Closed && self.server.state == TcpState::Closed)
            || self.client.state == TcpState::TimeWait
            || self.server.state == TcpState::TimeWait
    }

    pub fn should_clean_up(&self, cfg: &CleanupConfig, now: Instant) -> bool {
        cfg.should_clean_up(&self.client, &self.server, self.last_activity, now)
    }

    fn reassm_mut(&mut self, dir: Direction) -> &mut Reassembler {
        match dir {
            Direction::ClientToServer => &mut self.client_reassm,
            Direction::ServerToClient => &mut self.server_reassm,
        }
    }

    /// RST tears down both directions' reassembly and tells every analyzer
    /// once, no matter how many RSTs the sender fires.
    fn handle_reset(&mut self) {
        self.client_reassm.reset();
        self.server_reassm.reset();

        if !self.reset_seen {
            self.reset_seen = true;
            for analyzer in &self.analyzers {
                analyzer.on_reset();
            }
        }
    }

    /// Advance both endpoint machines from the same packet: the sender
    /// along the send edges, the receiver along the receive table.
    fn update_states(&mut self, from_client: bool, flags: TcpFlags, now: Instant) {
        let trigger_key = if from_client {
            self.key
        } else {
            self.key.reverse()
        };

        let (sender, receiver, sender_label, receiver_label) = if from_client {
            (&mut self.client, &mut self.server, "cli", "srv")
        } else {
            (&mut self.server, &mut self.client, "srv", "cli")
        };

        if is_violation(receiver.state, flags) {
            self.log.record(StateEntry::new(
                trigger_key,
                format!(
                    "flags({flags}) disallowed for {receiver_label} in {}, retained",
                    receiver.state
                ),
            ));
        }

        let new_sender = next_state_on_send(sender.state, flags);
        if sender.state != new_sender {
            let detail = format!(
                "flags({flags}) | {sender_label}(sent): {} -> {} | peer: {}",
                sender.state, new_sender, receiver.state
            );
            sender.apply(new_sender, now);
            self.log.record(StateEntry::new(trigger_key, detail));
        }

        let new_receiver = next_state_on_receive(receiver.state, flags);
        if receiver.state != new_receiver {
            let detail = format!(
                "flags({flags}) | {receiver_label}: {} -> {} | peer: {}",
                receiver.state, new_receiver, sender.state
            );
            receiver.apply(new_receiver, now);
            self.log.record(StateEntry::new(trigger_key, detail));
        }
    }
}
