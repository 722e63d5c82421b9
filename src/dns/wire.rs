//! RFC 1035 wire codec: enough of the protocol to marshal iterative queries
//! and unmarshal authoritative responses, including the DNSSEC record types
//! the validator interprets. Compression pointers are followed on decode;
//! encoding never compresses, so encoded RDATA doubles as the canonical form
//! (owner and embedded names are already lowercase).

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use super::enums::RecordType;
use super::record::{Ds, Dnskey, Nsec, Nsec3, RData, Record, Rrsig, Soa};
use super::{Message, Question};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message ends mid-field")]
    UnexpectedEof,
    #[error("invalid label length")]
    BadLabel,
    #[error("compression pointer does not point backwards")]
    BadPointer,
    #[error("name exceeds 255 octets")]
    NameTooLong,
    #[error("malformed {0} RDATA")]
    BadRdata(RecordType),
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::UnexpectedEof)?;
        let s = self.buf.get(self.pos..end).ok_or(DecodeError::UnexpectedEof)?;
        self.pos = end;
        Ok(s)
    }

    /// Read a possibly compressed name. Every pointer must land strictly
    /// before the previous one, which bounds the walk.
    fn name(&mut self) -> Result<String, DecodeError> {
        let mut out = String::new();
        let mut octets = 0usize;
        let mut jumped_from: Option<usize> = None;
        let mut pointer_bound = usize::MAX;
        let mut pos = self.pos;
        loop {
            let len = *self.buf.get(pos).ok_or(DecodeError::UnexpectedEof)?;
            match len {
                0 => {
                    pos += 1;
                    if jumped_from.is_none() {
                        self.pos = pos;
                    }
                    if out.is_empty() {
                        out.push('.');
                    }
                    return Ok(out);
                }
                l if l & 0xC0 == 0xC0 => {
                    let lo = *self.buf.get(pos + 1).ok_or(DecodeError::UnexpectedEof)?;
                    let target = (((l & 0x3F) as usize) << 8) | lo as usize;
                    if target >= pos || target >= pointer_bound {
                        return Err(DecodeError::BadPointer);
                    }
                    pointer_bound = target;
                    if jumped_from.is_none() {
                        jumped_from = Some(pos);
                        self.pos = pos + 2;
                    }
                    pos = target;
                }
                l if l & 0xC0 != 0 => return Err(DecodeError::BadLabel),
                l => {
                    let l = l as usize;
                    octets += l + 1;
                    if octets > 255 {
                        return Err(DecodeError::NameTooLong);
                    }
                    let label = self
                        .buf
                        .get(pos + 1..pos + 1 + l)
                        .ok_or(DecodeError::UnexpectedEof)?;
                    for &b in label {
                        out.push(b.to_ascii_lowercase() as char);
                    }
                    out.push('.');
                    pos += l + 1;
                    if jumped_from.is_none() {
                        self.pos = pos;
                    }
                }
            }
        }
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

fn decode_type_bitmap(data: &[u8], rtype: RecordType) -> Result<Vec<RecordType>, DecodeError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if i + 2 > data.len() {
            return Err(DecodeError::BadRdata(rtype));
        }
        let window = data[i] as u16;
        let len = data[i + 1] as usize;
        if len == 0 || len > 32 || i + 2 + len > data.len() {
            return Err(DecodeError::BadRdata(rtype));
        }
        for (byte_idx, &byte) in data[i + 2..i + 2 + len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    out.push(RecordType::from_u16(
                        window * 256 + (byte_idx as u16) * 8 + bit as u16,
                    ));
                }
            }
        }
        i += 2 + len;
    }
    Ok(out)
}

fn encode_type_bitmap(out: &mut Vec<u8>, types: &[RecordType]) {
    let mut values: Vec<u16> = types.iter().map(|t| t.to_u16()).collect();
    values.sort_unstable();
    values.dedup();
    let mut i = 0;
    while i < values.len() {
        let window = values[i] >> 8;
        let mut bytes = [0u8; 32];
        let mut max_byte = 0usize;
        while i < values.len() && values[i] >> 8 == window {
            let low = values[i] & 0xFF;
            let byte_idx = (low / 8) as usize;
            bytes[byte_idx] |= 0x80 >> (low % 8);
            max_byte = max_byte.max(byte_idx);
            i += 1;
        }
        out.push(window as u8);
        out.push((max_byte + 1) as u8);
        out.extend_from_slice(&bytes[..=max_byte]);
    }
}

fn decode_rdata(
    rtype: RecordType,
    cur: &mut Cursor<'_>,
    rdlen: usize,
) -> Result<RData, DecodeError> {
    let start = cur.pos;
    let end = start + rdlen;
    let rdata = match rtype {
        RecordType::A => {
            let b = cur.bytes(4)?;
            RData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        RecordType::AAAA => {
            let b = cur.bytes(16)?;
            let mut a = [0u8; 16];
            a.copy_from_slice(b);
            RData::AAAA(Ipv6Addr::from(a))
        }
        RecordType::NS => RData::NS(cur.name()?),
        RecordType::CNAME => RData::CNAME(cur.name()?),
        RecordType::DNAME => RData::DNAME(cur.name()?),
        RecordType::SOA => RData::SOA(Soa {
            mname: cur.name()?,
            rname: cur.name()?,
            serial: cur.u32()?,
            refresh: cur.u32()?,
            retry: cur.u32()?,
            expire: cur.u32()?,
            minimum: cur.u32()?,
        }),
        RecordType::DS => {
            let key_tag = cur.u16()?;
            let algorithm = cur.u8()?;
            let digest_type = cur.u8()?;
            let digest = cur.bytes(end.checked_sub(cur.pos).ok_or(DecodeError::UnexpectedEof)?)?;
            RData::DS(Ds {
                key_tag,
                algorithm,
                digest_type,
                digest: digest.to_vec(),
            })
        }
        RecordType::DNSKEY => {
            let flags = cur.u16()?;
            let protocol = cur.u8()?;
            let algorithm = cur.u8()?;
            let key = cur.bytes(end.checked_sub(cur.pos).ok_or(DecodeError::UnexpectedEof)?)?;
            RData::DNSKEY(Dnskey {
                flags,
                protocol,
                algorithm,
                public_key: key.to_vec(),
            })
        }
        RecordType::RRSIG => {
            let type_covered = RecordType::from_u16(cur.u16()?);
            let algorithm = cur.u8()?;
            let labels = cur.u8()?;
            let original_ttl = cur.u32()?;
            let expiration = cur.u32()?;
            let inception = cur.u32()?;
            let key_tag = cur.u16()?;
            let signer_name = cur.name()?;
            let sig = cur.bytes(end.checked_sub(cur.pos).ok_or(DecodeError::UnexpectedEof)?)?;
            RData::RRSIG(Rrsig {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer_name,
                signature: sig.to_vec(),
            })
        }
        RecordType::NSEC => {
            let next_domain = cur.name()?;
            let rest = cur.bytes(end.checked_sub(cur.pos).ok_or(DecodeError::UnexpectedEof)?)?;
            RData::NSEC(Nsec {
                next_domain,
                type_bitmap: decode_type_bitmap(rest, rtype)?,
            })
        }
        RecordType::NSEC3 => {
            let hash_algorithm = cur.u8()?;
            let flags = cur.u8()?;
            let iterations = cur.u16()?;
            let salt_len = cur.u8()? as usize;
            let salt = cur.bytes(salt_len)?.to_vec();
            let hash_len = cur.u8()? as usize;
            let next_hashed = cur.bytes(hash_len)?.to_vec();
            let rest = cur.bytes(end.checked_sub(cur.pos).ok_or(DecodeError::UnexpectedEof)?)?;
            RData::NSEC3(Nsec3 {
                hash_algorithm,
                flags,
                iterations,
                salt,
                next_hashed,
                type_bitmap: decode_type_bitmap(rest, rtype)?,
            })
        }
        RecordType::OPT => RData::OPT(cur.bytes(rdlen)?.to_vec()),
        _ => RData::Other(cur.bytes(rdlen)?.to_vec()),
    };
    if cur.pos > end {
        return Err(DecodeError::BadRdata(rtype));
    }
    // Skip any trailing bytes a sloppy encoder left behind.
    cur.pos = end;
    Ok(rdata)
}

/// Encode a record's RDATA in uncompressed (canonical) form.
pub fn encode_rdata(record: &Record) -> Vec<u8> {
    let mut out = Vec::new();
    match &record.rdata {
        RData::A(a) => out.extend_from_slice(&a.octets()),
        RData::AAAA(a) => out.extend_from_slice(&a.octets()),
        RData::NS(n) | RData::CNAME(n) | RData::DNAME(n) => write_name(&mut out, n),
        RData::SOA(s) => {
            write_name(&mut out, &s.mname);
            write_name(&mut out, &s.rname);
            for v in [s.serial, s.refresh, s.retry, s.expire, s.minimum] {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        RData::DS(d) => {
            out.extend_from_slice(&d.key_tag.to_be_bytes());
            out.push(d.algorithm);
            out.push(d.digest_type);
            out.extend_from_slice(&d.digest);
        }
        RData::DNSKEY(k) => {
            out.extend_from_slice(&k.flags.to_be_bytes());
            out.push(k.protocol);
            out.push(k.algorithm);
            out.extend_from_slice(&k.public_key);
        }
        RData::RRSIG(s) => {
            out.extend_from_slice(&s.type_covered.to_u16().to_be_bytes());
            out.push(s.algorithm);
            out.push(s.labels);
            out.extend_from_slice(&s.original_ttl.to_be_bytes());
            out.extend_from_slice(&s.expiration.to_be_bytes());
            out.extend_from_slice(&s.inception.to_be_bytes());
            out.extend_from_slice(&s.key_tag.to_be_bytes());
            write_name(&mut out, &s.signer_name);
            out.extend_from_slice(&s.signature);
        }
        RData::NSEC(n) => {
            write_name(&mut out, &n.next_domain);
            encode_type_bitmap(&mut out, &n.type_bitmap);
        }
        RData::NSEC3(n) => {
            out.push(n.hash_algorithm);
            out.push(n.flags);
            out.extend_from_slice(&n.iterations.to_be_bytes());
            out.push(n.salt.len() as u8);
            out.extend_from_slice(&n.salt);
            out.push(n.next_hashed.len() as u8);
            out.extend_from_slice(&n.next_hashed);
            encode_type_bitmap(&mut out, &n.type_bitmap);
        }
        RData::OPT(raw) | RData::Other(raw) => out.extend_from_slice(raw),
    }
    out
}

fn encode_record(out: &mut Vec<u8>, record: &Record) {
    write_name(out, &record.name);
    out.extend_from_slice(&record.rtype.to_u16().to_be_bytes());
    out.extend_from_slice(&record.class.to_be_bytes());
    out.extend_from_slice(&record.ttl.to_be_bytes());
    let rdata = encode_rdata(record);
    out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    out.extend_from_slice(&rdata);
}

fn decode_record(cur: &mut Cursor<'_>) -> Result<Record, DecodeError> {
    let name = cur.name()?;
    let rtype = RecordType::from_u16(cur.u16()?);
    let class = cur.u16()?;
    let ttl = cur.u32()?;
    let rdlen = cur.u16()? as usize;
    let rdata = decode_rdata(rtype, cur, rdlen)?;
    Ok(Record {
        name,
        rtype,
        class,
        ttl,
        rdata,
    })
}

pub fn encode_message(msg: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(&msg.id.to_be_bytes());
    let mut flags: u16 = 0;
    if msg.response {
        flags |= 1 << 15;
    }
    flags |= ((msg.opcode & 0x0F) as u16) << 11;
    if msg.authoritative {
        flags |= 1 << 10;
    }
    if msg.truncated {
        flags |= 1 << 9;
    }
    if msg.recursion_desired {
        flags |= 1 << 8;
    }
    if msg.recursion_available {
        flags |= 1 << 7;
    }
    if msg.authenticated_data {
        flags |= 1 << 5;
    }
    if msg.checking_disabled {
        flags |= 1 << 4;
    }
    flags |= (msg.rcode & 0x0F) as u16;
    out.extend_from_slice(&flags.to_be_bytes());
    for count in [
        msg.questions.len(),
        msg.answer.len(),
        msg.authority.len(),
        msg.additional.len(),
    ] {
        out.extend_from_slice(&(count as u16).to_be_bytes());
    }
    for q in &msg.questions {
        write_name(&mut out, &q.name);
        out.extend_from_slice(&q.qtype.to_u16().to_be_bytes());
        out.extend_from_slice(&super::enums::CLASS_IN.to_be_bytes());
    }
    for section in [&msg.answer, &msg.authority, &msg.additional] {
        for record in section {
            encode_record(&mut out, record);
        }
    }
    out
}

pub fn decode_message(buf: &[u8]) -> Result<Message, DecodeError> {
    let mut cur = Cursor::new(buf, 0);
    let id = cur.u16()?;
    let flags = cur.u16()?;
    let qdcount = cur.u16()?;
    let ancount = cur.u16()?;
    let nscount = cur.u16()?;
    let arcount = cur.u16()?;

    let mut questions = Vec::with_capacity(qdcount as usize);
    for _ in 0..qdcount {
        let name = cur.name()?;
        let qtype = RecordType::from_u16(cur.u16()?);
        let _qclass = cur.u16()?;
        questions.push(Question { name, qtype });
    }
    let mut sections: [Vec<Record>; 3] = [
        Vec::with_capacity(ancount as usize),
        Vec::with_capacity(nscount as usize),
        Vec::with_capacity(arcount as usize),
    ];
    for (i, count) in [ancount, nscount, arcount].into_iter().enumerate() {
        for _ in 0..count {
            sections[i].push(decode_record(&mut cur)?);
        }
    }
    let [answer, authority, additional] = sections;

    Ok(Message {
        id,
        response: flags & (1 << 15) != 0,
        opcode: ((flags >> 11) & 0x0F) as u8,
        authoritative: flags & (1 << 10) != 0,
        truncated: flags & (1 << 9) != 0,
        recursion_desired: flags & (1 << 8) != 0,
        recursion_available: flags & (1 << 7) != 0,
        authenticated_data: flags & (1 << 5) != 0,
        checking_disabled: flags & (1 << 4) != 0,
        rcode: (flags & 0x0F) as u8,
        questions,
        answer,
        authority,
        additional,
    })
}
