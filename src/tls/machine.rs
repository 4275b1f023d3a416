use crate::flow::Direction;

use super::{HandshakeType, Tls12State};

/// One evaluated transition. `valid` is false when the input was not
/// allowed in `from`; in that case `to` is the `Error` sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub from: Tls12State,
    pub to: Tls12State,
    pub valid: bool,
}

/*
    TLS 1.2 full handshake, as visible to a tap. `?` marks optional nodes.

      C->S  ClientHello
      S->C  ServerHello, Certificate?, ServerKeyExchange?,
            CertificateRequest?, ServerHelloDone
      C->S  (Certificate?, CertificateVerify?), ClientKeyExchange,
            ChangeCipherSpec, Finished
      S->C  ChangeCipherSpec, Finished

    Everything after a direction's ChangeCipherSpec is encrypted, so from
    there that direction's handshake records advance the machine purely by
    position, not by message type.
*/
#[derive(Debug, Clone)]
pub struct Tls12Machine {
    state: Tls12State,
}

impl Default for Tls12Machine {
    fn default() -> Self {
        Tls12Machine::new()
    }
}

impl Tls12Machine {
    pub fn new() -> Self {
        Tls12Machine {
            state: Tls12State::Init,
        }
    }

    pub fn state(&self) -> Tls12State {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == Tls12State::HandshakeComplete
    }

    pub fn reset(&mut self) {
        self.state = Tls12State::Init;
    }

    /// Advance on a handshake record. `msg` is the record fragment's first
    /// byte; it is meaningless (and ignored) once the sending direction has
    /// switched ciphers.
    pub fn process_handshake(&mut self, dir: Direction, msg: Option<HandshakeType>) -> Step {
        use Direction::*;
        use Tls12State::*;

        if (self.state == CcsSent && dir == ClientToServer)
            || (self.state == CcsReceived && dir == ServerToClient)
            || self.state == FinishedReceived
        {
            return self.process_encrypted(dir);
        }

        let next = match (self.state, dir, msg) {
            (Init, ClientToServer, Some(HandshakeType::ClientHello)) => Some(ClientHelloSent),

            (ClientHelloSent, ServerToClient, Some(HandshakeType::ServerHello)) => {
                Some(ServerHelloReceived)
            }

            (ServerHelloReceived, ServerToClient, Some(HandshakeType::Certificate)) => {
                Some(CertificateReceived)
            }
            (
                ServerHelloReceived | CertificateReceived,
                ServerToClient,
                Some(HandshakeType::ServerKeyExchange),
            ) => Some(ServerKeyExchangeReceived),
            (
                ServerHelloReceived | CertificateReceived | ServerKeyExchangeReceived,
                ServerToClient,
                Some(HandshakeType::CertificateRequest),
            ) => Some(CertificateRequestReceived),
            (
                ServerHelloReceived
                | CertificateReceived
                | ServerKeyExchangeReceived
                | CertificateRequestReceived,
                ServerToClient,
                Some(HandshakeType::ServerHelloDone),
            ) => Some(ServerHelloDoneReceived),

            (ServerHelloDoneReceived, ClientToServer, Some(HandshakeType::Certificate)) => {
                Some(CertificateSent)
            }
            (CertificateSent, ClientToServer, Some(HandshakeType::CertificateVerify)) => {
                Some(CertificateVerifySent)
            }
            (
                ServerHelloDoneReceived | CertificateSent | CertificateVerifySent,
                ClientToServer,
                Some(HandshakeType::ClientKeyExchange),
            ) => Some(ClientKeyExchangeSent),

            (ClientKeyExchangeSent, ClientToServer, Some(HandshakeType::Finished)) => {
                Some(FinishedSent)
            }
            (FinishedSent, ServerToClient, Some(HandshakeType::Finished)) => {
                Some(FinishedReceived)
            }
            // the server may push a session ticket before its Finished
            (FinishedSent, ServerToClient, Some(HandshakeType::NewSessionTicket)) => {
                Some(FinishedSent)
            }

            _ => None,
        };

        self.step(next)
    }

    /// Advance on a ChangeCipherSpec record.
    pub fn process_change_cipher_spec(&mut self, dir: Direction) -> Step {
        use Direction::*;
        use Tls12State::*;

        let next = match (self.state, dir) {
            (ClientKeyExchangeSent, ClientToServer) => Some(CcsSent),
            (CcsSent, ClientToServer) => Some(FinishedSent),
            (FinishedSent, ServerToClient) => Some(CcsReceived),
            (CcsReceived, ServerToClient) => Some(FinishedReceived),
            (FinishedReceived, _) => Some(HandshakeComplete),
            _ => None,
        };

        self.step(next)
    }

    /// A handshake record whose sending direction already switched ciphers.
    /// The client's is its Finished; the server's is its Finished, which
    /// also completes the handshake — after that there is nothing left to
    /// exchange in cleartext.
    fn process_encrypted(&mut self, dir: Direction) -> Step {
        use Direction::*;
        use Tls12State::*;

        let next = match (self.state, dir) {
            (CcsSent, ClientToServer) => Some(FinishedSent),
            (CcsReceived, ServerToClient) => Some(HandshakeComplete),
            (FinishedReceived, _) => Some(HandshakeComplete),
            _ => None,
        };

        self.step(next)
    }

    fn step(&mut self, next: Option<Tls12State>) -> Step {
        let from = self.state;
        let (to, valid) = match next {
            Some(state) => (state, true),
            None => (Tls12State::Error, false),
        };
        self.state = to;
        Step { from, to, valid }
    }
}
