//! Record-set utilities: filtering, grouping, and in-bailiwick checks over
//! lists of resource records. All total and side-effect-free.

use std::collections::HashMap;

use super::enums::RecordType;
use super::name;
use super::record::Record;

/// Records whose type is NOT in `types`.
pub fn filter_out<'a>(records: &'a [Record], types: &[RecordType]) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|r| !types.contains(&r.rtype))
        .collect()
}

/// Records matching one of `types` and, when `name` is non-empty, whose owner
/// equals it.
pub fn extract<'a>(records: &'a [Record], name: &str, types: &[RecordType]) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|r| types.contains(&r.rtype))
        .filter(|r| name.is_empty() || r.name.eq_ignore_ascii_case(name))
        .collect()
}

/// Like [`extract`] but grouped by type; every requested type gets an entry,
/// possibly empty.
pub fn extract_grouped<'a>(
    records: &'a [Record],
    name: &str,
    types: &[RecordType],
) -> HashMap<RecordType, Vec<&'a Record>> {
    let mut out: HashMap<RecordType, Vec<&Record>> = HashMap::with_capacity(types.len());
    for t in types {
        out.insert(*t, Vec::new());
    }
    for r in records {
        if let Some(bucket) = out.get_mut(&r.rtype) {
            if name.is_empty() || r.name.eq_ignore_ascii_case(name) {
                bucket.push(r);
            }
        }
    }
    out
}

/// True iff every non-OPT record's owner sits at or below `zone`.
pub fn in_bailiwick(records: &[Record], zone: &str) -> bool {
    records
        .iter()
        .filter(|r| r.rtype != RecordType::OPT)
        .all(|r| name::in_zone(&r.name, zone))
}

/// True iff the set is non-empty and every record has type `t`.
pub fn all_of_type(records: &[&Record], t: RecordType) -> bool {
    !records.is_empty() && records.iter().all(|r| r.rtype == t)
}

/// True iff some record in the set has type `t`.
pub fn contains_type(records: &[Record], t: RecordType) -> bool {
    records.iter().any(|r| r.rtype == t)
}
