//! Question/answer cache keyed by a digest of (type, name), with per-entry
//! TTLs, a "forever" variant for trust anchors, and a background sweeper
//! that prunes expired entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use ring::digest;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::dns::enums::RecordType;
use crate::dns::{Question, Record};
use crate::resolver::Answer;

/// Cache key: SHA-1 over the question type bytes followed by the name bytes.
pub type CacheId = [u8; 20];

pub fn hash_question(q: &Question) -> CacheId {
    let t = q.qtype.to_u16();
    let mut inp = Vec::with_capacity(2 + q.name.len());
    inp.push((t & 0xff) as u8);
    inp.push((t >> 8) as u8);
    inp.extend_from_slice(q.name.as_bytes());
    let d = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &inp);
    let mut id = [0u8; 20];
    id.copy_from_slice(d.as_ref());
    id
}

/// Minimum TTL across a response's records, with RRSIG records clamped to
/// their real remaining signature lifetime so stale signatures never outlive
/// their validity window. OPT pseudo-records carry flags in their TTL field
/// and are skipped.
fn min_ttl<'a>(records: impl Iterator<Item = &'a Record>, now: u64) -> u64 {
    let mut min: Option<u64> = None;
    for r in records {
        if r.rtype == RecordType::OPT {
            continue;
        }
        let mut candidate = u64::from(r.ttl);
        if let Some(sig) = r.as_rrsig() {
            // RFC 4034 §3.1.5: expiration compares to the current time in
            // serial-number arithmetic modulo 2^32.
            let expires_in = sig.expiration.wrapping_sub(now as u32) as i32;
            if expires_in > 0 && (expires_in as u64) < candidate {
                candidate = expires_in as u64;
            }
        }
        min = Some(min.map_or(candidate, |m| m.min(candidate)));
    }
    min.unwrap_or(0)
}

#[derive(Debug)]
struct CacheEntry {
    answer: Answer,
    ttl: u64,
    modified: u64,
    forever: bool,
}

impl CacheEntry {
    fn expired(&self, now: u64) -> bool {
        !self.forever && now > self.modified + self.ttl
    }
}

/// The cache contract `Resolver` consumes; the internal implementation can
/// be swapped by embedding users.
pub trait AnswerCache: Send + Sync {
    fn get(&self, q: &Question) -> Option<Answer>;
    fn add(&self, q: &Question, answer: &Answer, forever: bool);
}

/// Coarse reader-writer map of per-entry locked slots. Readers clone the
/// stored answer under the entry lock, so an in-place overwrite is atomic
/// from any reader's viewpoint.
pub struct BasicCache {
    entries: RwLock<HashMap<CacheId, Arc<Mutex<CacheEntry>>>>,
    clock: Arc<dyn Clock>,
}

impl BasicCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Spawn the periodic sweeper onto the current runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    /// Delete every expired entry. Expiry is evaluated under the read lock;
    /// deletion takes the write lock per victim so lookups are never blocked
    /// for the whole scan.
    pub fn sweep(&self) {
        let now = self.clock.now_unix();
        let expired: Vec<CacheId> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, e)| e.lock().expired(now))
                .map(|(id, _)| *id)
                .collect()
        };
        let count = expired.len();
        for id in expired {
            self.entries.write().remove(&id);
        }
        if count > 0 {
            debug!(count, "swept expired cache entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl AnswerCache for BasicCache {
    fn get(&self, q: &Question) -> Option<Answer> {
        let id = hash_question(q);
        let entry = {
            let entries = self.entries.read();
            entries.get(&id).cloned()
        }?;
        let entry = entry.lock();
        trace!(name = %q.name, qtype = %q.qtype, "cache hit");
        Some(entry.answer.clone())
    }

    fn add(&self, q: &Question, answer: &Answer, forever: bool) {
        let ttl = if forever {
            0
        } else {
            let records = answer
                .answer
                .iter()
                .chain(answer.authority.iter())
                .chain(answer.additional.iter());
            let ttl = min_ttl(records, self.clock.now_unix());
            if ttl == 0 {
                trace!(name = %q.name, qtype = %q.qtype, "zero ttl, not caching");
                return;
            }
            ttl
        };

        let id = hash_question(q);
        let now = self.clock.now_unix();
        if let Some(entry) = self.entries.read().get(&id) {
            let mut entry = entry.lock();
            // Forever entries hold trust anchors and are never replaced by
            // resolution.
            if !entry.forever {
                entry.answer = answer.clone();
                entry.ttl = ttl;
                entry.modified = now;
            }
            return;
        }
        self.entries.write().insert(
            id,
            Arc::new(Mutex::new(CacheEntry {
                answer: answer.clone(),
                ttl,
                modified: now,
                forever,
            })),
        );
    }
}
