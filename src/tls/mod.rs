use std::fmt;

mod analyzer;
mod machine;
mod record;

pub use analyzer::TlsAnalyzer;
pub use machine::{Step, Tls12Machine};
pub use record::{Extract, Record, RecordBuffer};

pub const RECORD_HEADER_LEN: usize = 5;
pub const MAX_RECORD_LEN: usize = 16384;

/// TLS record layer content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Heartbeat,
}

impl ContentType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            24 => Some(ContentType::Heartbeat),
            _ => None,
        }
    }
}

/// Record layer protocol versions accepted by the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl Version {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x0301 => Some(Version::Tls10),
            0x0302 => Some(Version::Tls11),
            0x0303 => Some(Version::Tls12),
            0x0304 => Some(Version::Tls13),
            _ => None,
        }
    }
}

/// Handshake protocol message types (RFC 5246).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    NewSessionTicket,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
}

impl HandshakeType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(HandshakeType::HelloRequest),
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            4 => Some(HandshakeType::NewSessionTicket),
            11 => Some(HandshakeType::Certificate),
            12 => Some(HandshakeType::ServerKeyExchange),
            13 => Some(HandshakeType::CertificateRequest),
            14 => Some(HandshakeType::ServerHelloDone),
            15 => Some(HandshakeType::CertificateVerify),
            16 => Some(HandshakeType::ClientKeyExchange),
            20 => Some(HandshakeType::Finished),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeType::HelloRequest => "HelloRequest",
            HandshakeType::ClientHello => "ClientHello",
            HandshakeType::ServerHello => "ServerHello",
            HandshakeType::NewSessionTicket => "NewSessionTicket",
            HandshakeType::Certificate => "Certificate",
            HandshakeType::ServerKeyExchange => "ServerKeyExchange",
            HandshakeType::CertificateRequest => "CertificateRequest",
            HandshakeType::ServerHelloDone => "ServerHelloDone",
            HandshakeType::CertificateVerify => "CertificateVerify",
            HandshakeType::ClientKeyExchange => "ClientKeyExchange",
            HandshakeType::Finished => "Finished",
        }
    }
}

impl fmt::Display for HandshakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a TLS 1.2 handshake as inferred from the cleartext record flow.
/// `Error` is a terminal sink for protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tls12State {
    Init,
    ClientHelloSent,
    ServerHelloReceived,
    CertificateReceived,
    ServerKeyExchangeReceived,
    CertificateRequestReceived,
    ServerHelloDoneReceived,
    CertificateSent,
    CertificateVerifySent,
    ClientKeyExchangeSent,
    CcsSent,
    FinishedSent,
    CcsReceived,
    FinishedReceived,
    HandshakeComplete,
    Error,
}

impl Tls12State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tls12State::Init => "INIT",
            Tls12State::ClientHelloSent => "CLIENT_HELLO_SENT",
            Tls12State::ServerHelloReceived => "SERVER_HELLO_RECEIVED",
            Tls12State::CertificateReceived => "CERTIFICATE_RECEIVED",
            Tls12State::ServerKeyExchangeReceived => "SERVER_KEY_EXCHANGE_RECEIVED",
            Tls12State::CertificateRequestReceived => "CERTIFICATE_REQUEST_RECEIVED",
            Tls12State::ServerHelloDoneReceived => "SERVER_HELLO_DONE_RECEIVED",
            Tls12State::CertificateSent => "CERTIFICATE_SENT",
            Tls12State::CertificateVerifySent => "CERTIFICATE_VERIFY_SENT",
            Tls12State::ClientKeyExchangeSent => "CLIENT_KEY_EXCHANGE_SENT",
            Tls12State::CcsSent => "CHANGE_CIPHER_SPEC_SENT",
            Tls12State::FinishedSent => "FINISHED_SENT",
            Tls12State::CcsReceived => "CHANGE_CIPHER_SPEC_RECEIVED",
            Tls12State::FinishedReceived => "FINISHED_RECEIVED",
            Tls12State::HandshakeComplete => "HANDSHAKE_COMPLETE",
            Tls12State::Error => "ERROR",
        }
    }
}

impl fmt::Display for Tls12State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
