//! Authenticated denial of existence: NSEC/NSEC3 closest-encloser walks and
//! the name-error, no-data, and delegation proofs of RFC 5155 §8.

use ring::digest;
use tracing::trace;

use crate::dns::enums::RecordType;
use crate::dns::record::{Nsec3, Record, NSEC3_HASH_SHA1};
use crate::dns::{name, Question};
use crate::errors::DenialError;

/// Zones publishing more NSEC3 iterations than this are treated as unusable
/// (RFC 5155 §10.3 guidance; matches common resolver limits).
pub const MAX_NSEC3_ITERATIONS: u16 = 2500;

/// Iterated, salted SHA-1 of a name (RFC 5155 §5).
pub fn nsec3_hash(owner: &str, salt: &[u8], iterations: u16) -> Vec<u8> {
    let mut input = name::to_wire(owner);
    input.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input)
        .as_ref()
        .to_vec();
    for _ in 0..iterations {
        hash.extend_from_slice(salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &hash)
            .as_ref()
            .to_vec();
    }
    hash
}

/// Base32hex (RFC 4648 §7) owner-label form of an NSEC3 hash.
pub fn nsec3_hash_label(owner: &str, salt: &[u8], iterations: u16) -> String {
    base32::encode(
        base32::Alphabet::Rfc4648Hex { padding: false },
        &nsec3_hash(owner, salt, iterations),
    )
    .to_ascii_lowercase()
}

/// The zone an NSEC3 record belongs to: its owner minus the hash label.
fn nsec3_zone(owner: &str) -> &str {
    match owner.find('.') {
        Some(i) if i + 1 < owner.len() => &owner[i + 1..],
        _ => ".",
    }
}

fn nsec3_usable(n3: &Nsec3) -> bool {
    n3.hash_algorithm == NSEC3_HASH_SHA1 && n3.iterations <= MAX_NSEC3_ITERATIONS
}

/// Decode the hash label of an NSEC3 owner name.
fn nsec3_owner_hash(owner: &str) -> Option<Vec<u8>> {
    let label = owner.split('.').next()?;
    base32::decode(
        base32::Alphabet::Rfc4648Hex { padding: false },
        &label.to_ascii_uppercase(),
    )
}

/// True iff the denial record's owner matches `target` (for NSEC3: the
/// hashed form of `target`).
fn matches(record: &Record, target: &str) -> bool {
    if let Some(n3) = record.as_nsec3() {
        if !nsec3_usable(n3) || !name::in_zone(target, nsec3_zone(&record.name)) {
            return false;
        }
        let hash = nsec3_hash(target, &n3.salt, n3.iterations);
        return nsec3_owner_hash(&record.name).is_some_and(|h| h == hash);
    }
    if record.as_nsec().is_some() {
        return record.name.eq_ignore_ascii_case(target);
    }
    false
}

/// True iff the denial record's interval strictly covers `target`, handling
/// the wrap-around at the end of the zone.
fn covers(record: &Record, target: &str) -> bool {
    if let Some(n3) = record.as_nsec3() {
        if !nsec3_usable(n3) || !name::in_zone(target, nsec3_zone(&record.name)) {
            return false;
        }
        let Some(owner_hash) = nsec3_owner_hash(&record.name) else {
            return false;
        };
        let hash = nsec3_hash(target, &n3.salt, n3.iterations);
        let next = &n3.next_hashed;
        return if next.as_slice() <= owner_hash.as_slice() {
            // Last interval in the chain wraps past the largest hash.
            hash > owner_hash || hash < *next
        } else {
            hash > owner_hash && hash < *next
        };
    }
    if let Some(nsec) = record.as_nsec() {
        use std::cmp::Ordering::*;
        let after_owner = name::canonical_cmp(&record.name, target) == Less;
        let wraps = name::canonical_cmp(&nsec.next_domain, &record.name) != Greater;
        let before_next = name::canonical_cmp(target, &nsec.next_domain) == Less;
        return if wraps {
            after_owner || before_next
        } else {
            after_owner && before_next
        };
    }
    false
}

fn bitmap_of(record: &Record) -> &[RecordType] {
    if let Some(n3) = record.as_nsec3() {
        &n3.type_bitmap
    } else if let Some(nsec) = record.as_nsec() {
        &nsec.type_bitmap
    } else {
        &[]
    }
}

fn bitmap_has(record: &Record, types: &[RecordType]) -> bool {
    bitmap_of(record).iter().any(|t| types.contains(t))
}

/// Pull the denial records out of an authority section. NSEC and NSEC3 are
/// never combined in one proof; a response carrying both is rejected.
pub fn denial_set(records: &[Record]) -> Result<Vec<&Record>, DenialError> {
    let nsec: Vec<&Record> = records
        .iter()
        .filter(|r| r.rtype == RecordType::NSEC)
        .collect();
    let nsec3: Vec<&Record> = records
        .iter()
        .filter(|r| r.rtype == RecordType::NSEC3)
        .collect();
    match (nsec.is_empty(), nsec3.is_empty()) {
        (false, false) => Err(DenialError::MixedRecords),
        (false, true) => Ok(nsec),
        (true, _) => Ok(nsec3),
    }
}

/// Walk from the full name toward the root until a denial record matches,
/// yielding the closest encloser and the next-closer name (RFC 5155 §8.3).
pub fn find_closest_encloser<'a>(
    target: &'a str,
    set: &[&Record],
) -> Option<(&'a str, &'a str)> {
    let ancestors = name::ancestors(target);
    for (i, candidate) in ancestors.iter().enumerate() {
        if set.iter().any(|r| matches(r, candidate)) {
            let next_closer = if i == 0 { target } else { ancestors[i - 1] };
            trace!(closest_encloser = *candidate, next_closer, "encloser found");
            return Some((*candidate, next_closer));
        }
    }
    None
}

/// The unique record matching `target`; zero or multiple matches error.
fn find_matching<'a>(target: &str, set: &[&'a Record]) -> Result<&'a Record, DenialError> {
    let mut found: Option<&Record> = None;
    for record in set {
        if matches(record, target) {
            if found.is_some() {
                return Err(DenialError::MultipleCoverage);
            }
            found = Some(record);
        }
    }
    found.ok_or(DenialError::MissingCoverage)
}

/// The unique record covering `target`; zero or multiple covers error.
/// With `require_opt_out`, NSEC3 records lacking the flag are not
/// considered covers at all.
fn find_covering<'a>(
    target: &str,
    set: &[&'a Record],
    require_opt_out: bool,
) -> Result<&'a Record, DenialError> {
    let mut found: Option<&Record> = None;
    for record in set {
        if require_opt_out && record.as_nsec3().is_some_and(|n3| !n3.opt_out()) {
            continue;
        }
        if covers(record, target) {
            if found.is_some() {
                return Err(DenialError::MultipleCoverage);
            }
            found = Some(record);
        }
    }
    found.ok_or(DenialError::MissingCoverage)
}

fn wildcard_of(encloser: &str) -> String {
    if encloser == "." {
        "*.".to_string()
    } else {
        format!("*.{}", encloser)
    }
}

/// NXDOMAIN proof (RFC 5155 §8.4): the closest encloser exists, the next
/// closer is covered, and the source of synthesis `*.<closest encloser>` is
/// covered. A record matching the denied name itself contradicts the proof.
pub fn verify_name_error(q: &Question, set: &[&Record]) -> Result<(), DenialError> {
    let (encloser, next_closer) =
        find_closest_encloser(&q.name, set).ok_or(DenialError::MissingCoverage)?;
    if find_matching(&q.name, set).is_ok() {
        return Err(DenialError::Mismatch);
    }
    find_covering(next_closer, set, false)?;
    find_covering(&wildcard_of(encloser), set, false)?;
    Ok(())
}

/// NODATA proof (RFC 5155 §§8.5–8.7): a record matches the name but its
/// bitmap carries neither the question type nor CNAME. For DS questions with
/// no matching record, the §8.6 opt-out chain applies instead; the covering
/// NSEC3 must then carry the opt-out flag.
pub fn verify_nodata(q: &Question, set: &[&Record]) -> Result<(), DenialError> {
    match find_matching(&q.name, set) {
        Ok(record) => {
            if bitmap_has(record, &[q.qtype, RecordType::CNAME]) {
                return Err(DenialError::TypeExists);
            }
            if q.name.starts_with("*.") {
                // RFC 5155 §8.7: wildcard no-data also proves the source of
                // synthesis lacks the type.
                let (encloser, _) =
                    find_closest_encloser(&q.name, set).ok_or(DenialError::MissingCoverage)?;
                let source = find_matching(&wildcard_of(encloser), set)?;
                if bitmap_has(source, &[q.qtype, RecordType::CNAME]) {
                    return Err(DenialError::TypeExists);
                }
            }
            Ok(())
        }
        Err(err) => {
            if q.qtype != RecordType::DS {
                return Err(err);
            }
            // RFC 5155 §8.6: DS question inside an opt-out span.
            let (_, next_closer) =
                find_closest_encloser(&q.name, set).ok_or(DenialError::MissingCoverage)?;
            let cover = find_covering(next_closer, set, false)?;
            if cover.as_nsec3().is_some_and(|n3| !n3.opt_out()) {
                return Err(DenialError::OptOutMissing);
            }
            Ok(())
        }
    }
}

/// Delegation proof (RFC 5155 §8.9): either a record matches the zone cut
/// and its bitmap has NS but neither DS nor SOA, or an opt-out span covers
/// the next closer beneath an existing closest encloser.
pub fn verify_delegation(delegation: &str, set: &[&Record]) -> Result<(), DenialError> {
    match find_matching(delegation, set) {
        Ok(record) => {
            if !bitmap_has(record, &[RecordType::NS]) {
                return Err(DenialError::NsMissing);
            }
            if bitmap_has(record, &[RecordType::DS, RecordType::SOA]) {
                return Err(DenialError::BadDelegation);
            }
            Ok(())
        }
        Err(_) => {
            let (_, next_closer) =
                find_closest_encloser(delegation, set).ok_or(DenialError::MissingCoverage)?;
            find_covering(next_closer, set, true)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::record::{RData, NSEC3_FLAG_OPT_OUT};

    pub fn make_nsec3(
        owner: &str,
        next: &str,
        zone: &str,
        opt_out: bool,
        types: &[RecordType],
    ) -> Record {
        let salt = [0xFF, 0xFF];
        let iterations = 2;
        let label = nsec3_hash_label(owner, &salt, iterations);
        Record::new(
            format!("{}.{}", label, zone.trim_start_matches('.')),
            RecordType::NSEC3,
            3600,
            RData::NSEC3(Nsec3 {
                hash_algorithm: NSEC3_HASH_SHA1,
                flags: if opt_out { NSEC3_FLAG_OPT_OUT } else { 0 },
                iterations,
                salt: salt.to_vec(),
                next_hashed: nsec3_hash(next, &salt, iterations),
                type_bitmap: types.to_vec(),
            }),
        )
    }

    #[test]
    fn hash_label_matches_known_vector() {
        // RFC 5155 Appendix B: H(example.) with salt aabbccdd, 12 iterations.
        assert_eq!(
            nsec3_hash_label("example.", &hex::decode("aabbccdd").unwrap(), 12),
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom"
        );
    }

    #[test]
    fn encloser_walk_finds_longest_match() {
        let set = vec![make_nsec3("com.", "a.com.", "com.", false, &[RecordType::NS])];
        let refs: Vec<&Record> = set.iter().collect();
        let (ce, nc) = find_closest_encloser("x.y.com.", &refs).unwrap();
        assert_eq!(ce, "com.");
        assert_eq!(nc, "y.com.");
        assert!(find_closest_encloser("x.y.net.", &refs).is_none());
    }

    #[test]
    fn mixed_denial_sets_are_rejected() {
        let records = vec![
            make_nsec3("com.", "a.com.", "com.", false, &[]),
            Record::new(
                "a.com.",
                RecordType::NSEC,
                3600,
                RData::NSEC(crate::dns::record::Nsec {
                    next_domain: "b.com.".into(),
                    type_bitmap: vec![],
                }),
            ),
        ];
        assert_eq!(denial_set(&records), Err(DenialError::MixedRecords));
    }

    #[test]
    fn nsec_cover_handles_wraparound() {
        let nsec = Record::new(
            "x.example.",
            RecordType::NSEC,
            3600,
            RData::NSEC(crate::dns::record::Nsec {
                next_domain: "b.example.".into(),
                type_bitmap: vec![],
            }),
        );
        assert!(covers(&nsec, "z.example."));
        assert!(covers(&nsec, "a.example."));
        assert!(!covers(&nsec, "c.example."));
    }

    #[test]
    fn duplicate_covers_error() {
        let set = vec![
            make_nsec3("a.com.", "e.com.", "com.", true, &[]),
            make_nsec3("a.com.", "e.com.", "com.", true, &[]),
            make_nsec3("com.", "a.com.", "com.", false, &[]),
        ];
        let refs: Vec<&Record> = set.iter().collect();
        assert_eq!(
            verify_delegation("b.com.", &refs).unwrap_err(),
            DenialError::MultipleCoverage
        );
    }
}
