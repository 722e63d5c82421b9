pub mod enums;
pub mod name;
pub mod record;
pub mod rrset;
pub mod wire;

use serde::Serialize;

pub use enums::RecordType;
pub use record::{RData, Record};
pub use wire::{decode_message, encode_message, DecodeError};

/// A DNS IN question. Owner names are dotted lowercase FQDNs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Question {
    pub name: String,
    #[serde(rename = "type")]
    pub qtype: RecordType,
}

impl Question {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        Self {
            name: name::normalize(name),
            qtype,
        }
    }
}

/// A parsed DNS message. Header bits are unpacked; sections hold typed
/// records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: u16,
    pub response: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub authenticated_data: bool,
    pub checking_disabled: bool,
    pub rcode: u8,
    pub questions: Vec<Question>,
    pub answer: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
}

impl Message {
    /// A fresh query for `question` with a random id.
    pub fn query(question: Question) -> Self {
        Self {
            id: rand::random(),
            questions: vec![question],
            ..Self::default()
        }
    }

    /// Attach an EDNS0 OPT pseudo-record advertising `udp_size` and, when
    /// `dnssec_ok`, the DO bit (RFC 6891).
    pub fn set_edns0(&mut self, udp_size: u16, dnssec_ok: bool) {
        self.additional.push(Record {
            name: ".".to_string(),
            rtype: RecordType::OPT,
            class: udp_size,
            ttl: if dnssec_ok { 0x8000 } else { 0 },
            rdata: RData::OPT(Vec::new()),
        });
    }

    /// A response skeleton mirroring `request`'s id and question.
    pub fn reply_to(request: &Message) -> Self {
        Self {
            id: request.id,
            response: true,
            opcode: request.opcode,
            recursion_desired: request.recursion_desired,
            questions: request.questions.clone(),
            ..Self::default()
        }
    }
}
