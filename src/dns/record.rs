use std::net::{Ipv4Addr, Ipv6Addr};

use super::enums::{RecordType, CLASS_IN};

/// SOA RDATA (RFC 1035 §3.3.13).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Soa {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// DS RDATA (RFC 4034 §5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ds {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

/// DNSKEY RDATA (RFC 4034 §2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnskey {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

pub const DNSKEY_FLAG_ZSK: u16 = 256;
pub const DNSKEY_FLAG_KSK: u16 = 257;

/// RRSIG RDATA (RFC 4034 §3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rrsig {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: String,
    pub signature: Vec<u8>,
}

/// NSEC RDATA (RFC 4034 §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec {
    pub next_domain: String,
    pub type_bitmap: Vec<RecordType>,
}

/// NSEC3 RDATA (RFC 5155 §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3 {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed: Vec<u8>,
    pub type_bitmap: Vec<RecordType>,
}

pub const NSEC3_FLAG_OPT_OUT: u8 = 0x01;
pub const NSEC3_HASH_SHA1: u8 = 1;

impl Nsec3 {
    pub fn opt_out(&self) -> bool {
        self.flags & NSEC3_FLAG_OPT_OUT != 0
    }
}

/// Typed RDATA. Types the resolver doesn't interpret round-trip as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    DNAME(String),
    SOA(Soa),
    DS(Ds),
    DNSKEY(Dnskey),
    RRSIG(Rrsig),
    NSEC(Nsec),
    NSEC3(Nsec3),
    OPT(Vec<u8>),
    Other(Vec<u8>),
}

/// A single resource record. Owner names are lowercase FQDNs.
///
/// For OPT pseudo-records `class` carries the advertised UDP payload size and
/// `ttl` the extended flags word (RFC 6891 §6.1.3).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

impl Record {
    pub fn new(name: impl Into<String>, rtype: RecordType, ttl: u32, rdata: RData) -> Self {
        Self {
            name: name.into(),
            rtype,
            class: CLASS_IN,
            ttl,
            rdata,
        }
    }

    pub fn a(name: impl Into<String>, ttl: u32, addr: Ipv4Addr) -> Self {
        Self::new(name, RecordType::A, ttl, RData::A(addr))
    }

    pub fn aaaa(name: impl Into<String>, ttl: u32, addr: Ipv6Addr) -> Self {
        Self::new(name, RecordType::AAAA, ttl, RData::AAAA(addr))
    }

    pub fn ns(name: impl Into<String>, ttl: u32, target: impl Into<String>) -> Self {
        Self::new(name, RecordType::NS, ttl, RData::NS(target.into()))
    }

    pub fn cname(name: impl Into<String>, ttl: u32, target: impl Into<String>) -> Self {
        Self::new(name, RecordType::CNAME, ttl, RData::CNAME(target.into()))
    }

    pub fn dname(name: impl Into<String>, ttl: u32, target: impl Into<String>) -> Self {
        Self::new(name, RecordType::DNAME, ttl, RData::DNAME(target.into()))
    }

    pub fn as_a(&self) -> Option<Ipv4Addr> {
        match &self.rdata {
            RData::A(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_aaaa(&self) -> Option<Ipv6Addr> {
        match &self.rdata {
            RData::AAAA(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_ns(&self) -> Option<&str> {
        match &self.rdata {
            RData::NS(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_cname(&self) -> Option<&str> {
        match &self.rdata {
            RData::CNAME(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_dname(&self) -> Option<&str> {
        match &self.rdata {
            RData::DNAME(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_soa(&self) -> Option<&Soa> {
        match &self.rdata {
            RData::SOA(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ds(&self) -> Option<&Ds> {
        match &self.rdata {
            RData::DS(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dnskey(&self) -> Option<&Dnskey> {
        match &self.rdata {
            RData::DNSKEY(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_rrsig(&self) -> Option<&Rrsig> {
        match &self.rdata {
            RData::RRSIG(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_nsec(&self) -> Option<&Nsec> {
        match &self.rdata {
            RData::NSEC(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_nsec3(&self) -> Option<&Nsec3> {
        match &self.rdata {
            RData::NSEC3(n) => Some(n),
            _ => None,
        }
    }
}
