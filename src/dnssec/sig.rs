//! RRSIG validation over message sections and DS-to-DNSKEY matching across a
//! zone cut.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::algorithm::Algorithm;
use super::digest::DigestType;
use super::key_tag::calculate_key_tag;
use crate::clock::Clock;
use crate::dns::enums::RecordType;
use crate::dns::record::{Dnskey, Record, Rrsig, DNSKEY_FLAG_KSK, DNSKEY_FLAG_ZSK};
use crate::dns::{name, rrset, wire, Message};
use crate::errors::DnssecError;

/// DNSKEY records indexed by key tag. ZSKs and KSKs share the map; some
/// zones sign across the distinction, so the flag value is not trusted to
/// separate them.
pub type KeyMap = HashMap<u16, Record>;

/// Build a key map from DNSKEY records with flags 256 or 257.
pub fn build_key_map(records: &[Record]) -> KeyMap {
    let mut keys = KeyMap::new();
    for record in records {
        if let Some(dnskey) = record.as_dnskey() {
            if dnskey.flags == DNSKEY_FLAG_ZSK || dnskey.flags == DNSKEY_FLAG_KSK {
                keys.insert(key_tag_of(dnskey), record.clone());
            }
        }
    }
    keys
}

pub fn key_tag_of(key: &Dnskey) -> u16 {
    calculate_key_tag(key.flags, key.protocol, key.algorithm, &key.public_key)
}

/// True iff `now` lies within the RRSIG's inception/expiration window,
/// both bounds interpreted in serial-number arithmetic modulo 2^32
/// (RFC 4034 §3.1.5).
fn within_validity_period(sig: &Rrsig, now: u32) -> bool {
    let since_inception = now.wrapping_sub(sig.inception) as i32;
    let until_expiration = sig.expiration.wrapping_sub(now) as i32;
    since_inception >= 0 && until_expiration >= 0
}

/// The signed-data buffer of RFC 4034 §3.1.8.1: RRSIG RDATA sans signature,
/// then the covered RRset in canonical form and order. Wildcard-expanded
/// owners are folded back to `*.<suffix>` from the RRSIG label count.
/// Public so signing harnesses can produce verifiable records.
pub fn signed_data(sig: &Rrsig, records: &[&Record]) -> Vec<u8> {
    let mut data = Vec::with_capacity(512);
    data.extend_from_slice(&sig.type_covered.to_u16().to_be_bytes());
    data.push(sig.algorithm);
    data.push(sig.labels);
    data.extend_from_slice(&sig.original_ttl.to_be_bytes());
    data.extend_from_slice(&sig.expiration.to_be_bytes());
    data.extend_from_slice(&sig.inception.to_be_bytes());
    data.extend_from_slice(&sig.key_tag.to_be_bytes());
    data.extend_from_slice(&name::to_wire(&sig.signer_name));

    let mut canonical: Vec<(Vec<u8>, &Record)> = records
        .iter()
        .map(|r| (wire::encode_rdata(r), *r))
        .collect();
    canonical.sort_by(|a, b| a.0.cmp(&b.0));

    for (rdata, record) in canonical {
        let labels = name::labels(&record.name);
        if labels.len() > sig.labels as usize {
            // Wildcard expansion: sign "*" plus the rightmost `labels` labels.
            data.extend_from_slice(b"\x01*");
            let suffix = &labels[labels.len() - sig.labels as usize..];
            for label in suffix {
                data.push(label.len() as u8);
                data.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
            }
            data.push(0);
        } else {
            data.extend_from_slice(&name::to_wire(&record.name));
        }
        data.extend_from_slice(&record.rtype.to_u16().to_be_bytes());
        data.extend_from_slice(&record.class.to_be_bytes());
        data.extend_from_slice(&sig.original_ttl.to_be_bytes());
        data.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&rdata);
    }
    data
}

/// Verify every RRSIG in the answer and authority sections of `msg` against
/// `keys`. A section with records but no signatures fails; an empty section
/// is skipped.
pub fn verify_rrsig(
    msg: &Message,
    keys: &KeyMap,
    clock: &dyn Clock,
) -> Result<(), DnssecError> {
    for section in [&msg.answer, &msg.authority] {
        if section.is_empty() {
            continue;
        }
        let sigs = rrset::extract(section, "", &[RecordType::RRSIG]);
        if sigs.is_empty() {
            return Err(DnssecError::NoSignatures);
        }
        for sig_record in sigs {
            let sig = sig_record.as_rrsig().ok_or(DnssecError::NoSignatures)?;
            let covered = rrset::extract(section, &sig_record.name, &[sig.type_covered]);
            if covered.is_empty() {
                return Err(DnssecError::MissingSignedRecords);
            }
            let key_record = keys
                .get(&sig.key_tag)
                .ok_or(DnssecError::MissingDnskey)?;
            let dnskey = key_record.as_dnskey().ok_or(DnssecError::MissingDnskey)?;
            let algorithm = Algorithm::from_u8(sig.algorithm)
                .ok_or(DnssecError::UnsupportedAlgorithm(sig.algorithm))?;
            algorithm.verify(&dnskey.public_key, &signed_data(sig, &covered), &sig.signature)?;
            if !within_validity_period(sig, clock.now_unix() as u32) {
                return Err(DnssecError::InvalidSignaturePeriod);
            }
            trace!(
                owner = %sig_record.name,
                covered = %sig.type_covered,
                key_tag = sig.key_tag,
                "rrsig verified"
            );
        }
    }
    Ok(())
}

/// DS digest input: owner name in canonical wire form followed by the DNSKEY
/// RDATA (RFC 4034 §5.1.4).
pub fn dnskey_digest(owner: &str, key: &Dnskey, digest_type: DigestType) -> Vec<u8> {
    let mut data = name::to_wire(owner);
    data.extend_from_slice(&key.flags.to_be_bytes());
    data.push(key.protocol);
    data.push(key.algorithm);
    data.extend_from_slice(&key.public_key);
    digest_type.digest(&data)
}

/// Match the parent zone's DS set against `keys`: the first DS whose key tag
/// resolves to a DNSKEY must reproduce the DS digest byte for byte.
pub fn check_ds(keys: &KeyMap, parent_ds_set: &[Record]) -> Result<(), DnssecError> {
    for record in parent_ds_set {
        let Some(parent_ds) = record.as_ds() else {
            continue;
        };
        // The key found by tag may not actually be flagged as a KSK; that
        // distinction is unreliable in the wild and irrelevant here.
        let Some(key_record) = keys.get(&parent_ds.key_tag) else {
            continue;
        };
        let dnskey = key_record.as_dnskey().ok_or(DnssecError::MissingKsk)?;
        let digest_type = DigestType::from_u8(parent_ds.digest_type)
            .ok_or(DnssecError::FailedToConvertKsk)?;
        let digest = dnskey_digest(&key_record.name, dnskey, digest_type);
        if digest != parent_ds.digest {
            return Err(DnssecError::MismatchingDs);
        }
        debug!(key_tag = parent_ds.key_tag, "ds matches ksk dnskey");
        return Ok(());
    }
    Err(DnssecError::MissingKsk)
}
