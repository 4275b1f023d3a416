use std::time::{Duration, Instant};

use super::TcpFlags;

/*
                RFC 9293 - S3.3.2, as seen by a passive observer

    A tap never sends anything, so both endpoint machines are inferred
    from the same packet: the side that sent it advances along the RFC's
    "snd" edges, the side that will receive it along the "rcv" edges.

               initiator                         responder
               ---------                         ---------
        snd SYN -> SynSent                 rcv SYN     -> SynRcvd
        rcv SYN,ACK -> Estab               rcv ACK     -> Estab
        snd FIN -> FinWait1                rcv FIN     -> CloseWait
        rcv ACK of FIN -> FinWait2         snd FIN     -> LastAck
        rcv FIN,ACK -> TimeWait            rcv ACK     -> Closed
        rcv FIN -> Closing
        (RST from anywhere -> Closed, on both machines)
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Estab,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TcpState::Closed => "CLOSED",
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRcvd => "SYN_RCVD",
            TcpState::Estab => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
        }
    }
}

impl std::fmt::Display for TcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// New state for the side that receives this segment, inferred from the
/// observed flags. RST always wins; a flag set with no matching rule keeps
/// the current state (the caller decides whether that is worth logging).
pub fn next_state_on_receive(current: TcpState, f: TcpFlags) -> TcpState {
    use TcpState::*;

    if f.rst {
        return Closed;
    }

    match current {
        Closed | Listen => {
            if f.syn && !f.ack {
                SynRcvd
            } else {
                current
            }
        }
        SynSent => {
            if f.syn && f.ack {
                Estab
            } else if f.syn {
                SynRcvd
            } else {
                current
            }
        }
        SynRcvd => {
            // FIN dominates here just as in Estab; only FinWait1 gives
            // FIN+ACK a state of its own.
            if f.fin {
                CloseWait
            } else if f.ack {
                Estab
            } else {
                current
            }
        }
        Estab => {
            if f.fin {
                CloseWait
            } else {
                current
            }
        }
        FinWait1 => {
            if f.fin && f.ack {
                TimeWait
            } else if f.ack {
                FinWait2
            } else if f.fin {
                Closing
            } else {
                current
            }
        }
        FinWait2 => {
            if f.fin {
                TimeWait
            } else {
                current
            }
        }
        Closing => {
            if f.ack {
                TimeWait
            } else {
                current
            }
        }
        LastAck => {
            if f.ack {
                Closed
            } else {
                current
            }
        }
        CloseWait | TimeWait => current,
    }
}

/// New state for the side that sent this segment. These are the RFC "snd"
/// edges an observer can infer without participating: sending a SYN opens,
/// sending a FIN requests close, sending a RST abandons.
pub fn next_state_on_send(current: TcpState, f: TcpFlags) -> TcpState {
    use TcpState::*;

    if f.rst {
        return Closed;
    }

    match current {
        Closed | Listen => {
            if f.syn && !f.ack {
                SynSent
            } else {
                current
            }
        }
        Estab | SynRcvd => {
            if f.fin {
                FinWait1
            } else {
                current
            }
        }
        CloseWait => {
            if f.fin {
                LastAck
            } else {
                current
            }
        }
        _ => current,
    }
}

/// A flag combination that can never legitimately reach the current state:
/// retained without a transition, but worth a log line.
pub fn is_violation(current: TcpState, f: TcpFlags) -> bool {
    use TcpState::*;

    if f.rst {
        return false;
    }

    match current {
        // A SYN inside a synchronized connection is a spoof, a stray
        // retransmission from a dead incarnation, or a collision.
        Estab | FinWait1 | FinWait2 | CloseWait | Closing | LastAck | TimeWait => f.syn,
        // A FIN before any SYN was seen cannot belong to this flow.
        Closed | Listen | SynSent => f.fin,
        SynRcvd => false,
    }
}

/// Per-side connection state with transition bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct ConnState {
    pub state: TcpState,
    pub prev_state: TcpState,
    pub start_time: Instant,
    pub time_wait_entry: Option<Instant>,
}

impl ConnState {
    pub fn new(state: TcpState, now: Instant) -> Self {
        ConnState {
            state,
            prev_state: TcpState::Closed,
            start_time: now,
            time_wait_entry: None,
        }
    }

    /// Apply a transition, keeping the previous state and stamping entry
    /// into TIME_WAIT. Returns true if the state actually changed.
    pub fn apply(&mut self, new_state: TcpState, now: Instant) -> bool {
        if new_state == self.state {
            return false;
        }

        self.prev_state = self.state;
        self.state = new_state;
        self.start_time = now;
        self.time_wait_entry = (new_state == TcpState::TimeWait).then_some(now);

        true
    }
}

/// Reclamation bounds. MSL caps how long a TIME_WAIT side lingers, the idle
/// bound reclaims flows that simply stopped talking.
#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    pub msl: Duration,
    pub idle: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            msl: Duration::from_secs(60),
            idle: Duration::from_secs(60),
        }
    }
}

impl CleanupConfig {
    /// Whether a flow in the given per-side states is reclaimable.
    pub fn should_clean_up(
        &self,
        client: &ConnState,
        server: &ConnState,
        last_activity: Instant,
        now: Instant,
    ) -> bool {
        if client.state == TcpState::Closed && server.state == TcpState::Closed {
            return true;
        }

        let timed_out = |side: &ConnState| {
            side.state == TcpState::TimeWait
                && side
                    .time_wait_entry
                    .map_or(false, |entered| now.duration_since(entered) >= self.msl)
        };
        if timed_out(client) || timed_out(server) {
            return true;
        }

        now.duration_since(last_activity) > self.idle
    }
}
