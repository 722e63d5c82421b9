//! The iterative resolution engine: referral-driven lookup loop with alias
//! chasing, bailiwick enforcement, and DNSSEC chain assembly.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, trace};

use crate::cache::AnswerCache;
use crate::clock::Clock;
use crate::config::ResolverConfig;
use crate::dns::enums::{RecordType, RCODE_NOERROR, RCODE_NXDOMAIN};
use crate::dns::record::RData;
use crate::dns::{name, rrset, Message, Question, Record};
use crate::dnssec::{denial, sig, EDNS_UDP_SIZE};
use crate::errors::{DnssecError, ResolveError, Result};
use crate::transport::{Exchanger, DNS_PORT};

/// The result of an iterative resolution. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Answer {
    pub answer: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
    pub rcode: u8,
    /// True only if every in-scope RRset along the resolution path validated
    /// against a DNSKEY anchored to the trust anchor.
    pub authenticated: bool,
}

/// An upstream authoritative nameserver: `zone` is the longest suffix it is
/// credentialed for ("." for the roots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Nameserver {
    pub name: String,
    pub addr: IpAddr,
    pub zone: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One upstream query within a lookup, for observability only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryLog {
    pub query: Question,
    pub rcode: u8,
    #[serde(skip_serializing_if = "is_false")]
    pub cache_hit: bool,
    #[serde(rename = "DNSSECValid")]
    pub dnssec_valid: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub referral: bool,
    /// Absent on cache hits.
    #[serde(rename = "NS", skip_serializing_if = "Option::is_none")]
    pub ns: Option<Nameserver>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub composites: Vec<QueryLog>,
}

impl QueryLog {
    fn new(query: Question, ns: Option<Nameserver>) -> Self {
        Self {
            query,
            rcode: 0,
            cache_hit: false,
            dnssec_valid: false,
            latency_ms: 0,
            error: None,
            truncated: false,
            referral: false,
            ns,
            composites: Vec::new(),
        }
    }
}

/// The per-lookup log tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LookupLog {
    pub query: Question,
    #[serde(rename = "DNSSECValid")]
    pub dnssec_valid: bool,
    pub rcode: u8,
    pub latency_ms: u64,
    pub composites: Vec<QueryLog>,
}

pub struct Resolver {
    config: ResolverConfig,
    exchanger: Arc<dyn Exchanger>,
    cache: Arc<dyn AnswerCache>,
    clock: Arc<dyn Clock>,
    root_nameservers: Vec<Nameserver>,
}

impl Resolver {
    /// Build a resolver from root hints and root DNSKEY trust anchors. The
    /// anchors are installed into the cache once, forever; they are the base
    /// of every validation chain.
    pub fn new(
        config: ResolverConfig,
        root_hints: &[Record],
        root_keys: Vec<Record>,
        cache: Arc<dyn AnswerCache>,
        exchanger: Arc<dyn Exchanger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut root_nameservers = Vec::new();
        let mut hint_types = vec![RecordType::A];
        if config.use_ipv6 {
            hint_types.push(RecordType::AAAA);
        }
        for record in rrset::extract(root_hints, "", &hint_types) {
            let addr = match &record.rdata {
                RData::A(a) => IpAddr::V4(*a),
                RData::AAAA(a) => IpAddr::V6(*a),
                _ => continue,
            };
            root_nameservers.push(Nameserver {
                name: record.name.clone(),
                addr,
                zone: ".".to_string(),
            });
        }
        debug!(
            roots = root_nameservers.len(),
            anchors = root_keys.len(),
            "resolver initialized"
        );

        cache.add(
            &Question::new(".", RecordType::DNSKEY),
            &Answer {
                answer: root_keys,
                authority: Vec::new(),
                additional: Vec::new(),
                rcode: RCODE_NOERROR,
                authenticated: true,
            },
            true,
        );

        Self {
            config,
            exchanger,
            cache,
            clock,
            root_nameservers,
        }
    }

    /// Resolve `question` iteratively from the roots, validating every
    /// response along the way when DNSSEC is enabled. The log tree is
    /// returned on both success and failure.
    pub async fn lookup(&self, question: Question) -> (LookupLog, Result<Answer>) {
        self.lookup_at(question, 0).await
    }

    /// Depth-bounded entry point shared with nested NS-address lookups.
    fn lookup_at(
        &self,
        question: Question,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = (LookupLog, Result<Answer>)> + Send + '_>> {
        Box::pin(async move {
            let started = Instant::now();
            let mut log = LookupLog {
                query: question.clone(),
                dnssec_valid: false,
                rcode: 0,
                latency_ms: 0,
                composites: Vec::new(),
            };
            let result = self.iterate(&mut log, question, depth).await;
            log.latency_ms = started.elapsed().as_millis() as u64;
            if let Ok(answer) = &result {
                log.rcode = answer.rcode;
            }
            (log, result)
        })
    }

    async fn iterate(
        &self,
        ll: &mut LookupLog,
        mut q: Question,
        depth: usize,
    ) -> Result<Answer> {
        if depth > self.config.max_referrals {
            return Err(ResolveError::TooManyReferrals);
        }

        let mut authority = self.random_root()?;
        let mut parent_ds_set: Vec<Record> = Vec::new();
        let mut at_root = true;
        let mut aliases_seen: HashSet<String> = HashSet::new();
        let mut chased: Vec<Record> = Vec::new();

        for _ in 0..self.config.max_referrals {
            let (mut log, response) = self.query(&q, &authority).await;
            let r = match response {
                Ok(r) => r,
                Err(err) => {
                    log.error = Some(err.to_string());
                    ll.composites.push(log);
                    return Err(err);
                }
            };

            // Chain validation: on a cache hit adopt the stored verdict,
            // otherwise validate whenever the chain is still live (first hop
            // from a root, or a signed parent handed us DS records).
            let mut validated = log.cache_hit && log.dnssec_valid;
            if self.config.dnssec_enabled
                && !log.cache_hit
                && (at_root || !parent_ds_set.is_empty())
            {
                let (dnskey_log, checked) =
                    self.check_signatures(&r, &authority, &parent_ds_set).await;
                log.composites.push(dnskey_log);
                if let Err(err) = checked {
                    log.dnssec_valid = false;
                    log.error = Some(err.to_string());
                    ll.composites.push(log);
                    return Err(err);
                }
                validated = true;
            }
            log.dnssec_valid = validated;
            ll.dnssec_valid = validated;

            if r.rcode != RCODE_NOERROR {
                if r.rcode == RCODE_NXDOMAIN {
                    if let Err(err) = self.check_name_error(&q, &r) {
                        log.dnssec_valid = false;
                        log.error = Some(err.to_string());
                        ll.composites.push(log);
                        return Err(err);
                    }
                }
                ll.composites.push(log);
                return Ok(extract_answer(r, validated));
            }

            if !r.answer.is_empty() {
                match is_alias(&r.answer, &q) {
                    Err(err) => {
                        log.error = Some(err.to_string());
                        ll.composites.push(log);
                        return Err(err);
                    }
                    Ok(Some((target, newly_chased))) => {
                        trace!(from = %q.name, to = %target, "chasing alias");
                        if !aliases_seen.insert(target.clone()) {
                            log.error = Some(ResolveError::AliasLoop.to_string());
                            ll.composites.push(log);
                            return Err(ResolveError::AliasLoop);
                        }
                        chased.extend(newly_chased);
                        q = Question {
                            name: target,
                            qtype: q.qtype,
                        };
                        authority = self.random_root()?;
                        parent_ds_set.clear();
                        at_root = true;
                        ll.composites.push(log);
                        continue;
                    }
                    Ok(None) => {
                        if !log.cache_hit {
                            self.cache.add(&q, &extract_answer(r.clone(), validated), false);
                        }
                        ll.composites.push(log);
                        let mut answer = extract_answer(r, validated);
                        if !chased.is_empty() {
                            let mut records = chased;
                            records.append(&mut answer.answer);
                            answer.answer = records;
                        }
                        return Ok(answer);
                    }
                }
            }

            if !r.authority.is_empty() {
                let is_referral = rrset::contains_type(&r.authority, RecordType::NS)
                    && !rrset::contains_type(&r.authority, RecordType::SOA);
                if is_referral {
                    log.referral = true;
                    let next = match self.pick_authority(&r.authority, &r.additional, depth).await
                    {
                        Ok(ns) => ns,
                        Err(err) => {
                            log.error = Some(err.to_string());
                            ll.composites.push(log);
                            return Err(err);
                        }
                    };
                    if self.config.dnssec_enabled && (at_root || !parent_ds_set.is_empty()) {
                        if let Err(err) = self.check_delegation(&next, &r, &parent_ds_set) {
                            log.dnssec_valid = false;
                            log.error = Some(err.to_string());
                            ll.composites.push(log);
                            return Err(err);
                        }
                        parent_ds_set = rrset::extract(&r.authority, &next.zone, &[RecordType::DS])
                            .into_iter()
                            .cloned()
                            .collect();
                    } else {
                        parent_ds_set.clear();
                    }
                    trace!(zone = %next.zone, ns = %next.name, addr = %next.addr, "referral");
                    authority = next;
                    at_root = false;
                    ll.composites.push(log);
                    continue;
                }

                // NODATA: no answer, no delegation. Prove the type's absence
                // when the zone published denial records.
                let set = match denial::denial_set(&r.authority) {
                    Ok(set) => set,
                    Err(err) => {
                        log.error = Some(err.to_string());
                        ll.composites.push(log);
                        return Err(err.into());
                    }
                };
                if !set.is_empty() {
                    if let Err(err) = denial::verify_nodata(&q, &set) {
                        log.dnssec_valid = false;
                        log.error = Some(err.to_string());
                        ll.composites.push(log);
                        return Err(err.into());
                    }
                }
                ll.composites.push(log);
                return Ok(extract_answer(r, validated));
            }

            log.error = Some(ResolveError::NoNsAuthorities.to_string());
            ll.composites.push(log);
            return Err(ResolveError::NoNsAuthorities);
        }
        Err(ResolveError::TooManyReferrals)
    }

    /// Issue `q` to `authority`, preferring the shared cache. Responses must
    /// be entirely in-bailiwick for the authority's zone.
    async fn query(&self, q: &Question, authority: &Nameserver) -> (QueryLog, Result<Message>) {
        let started = Instant::now();
        let mut log = QueryLog::new(q.clone(), Some(authority.clone()));

        if let Some(cached) = self.cache.get(q) {
            log.cache_hit = true;
            log.ns = None;
            log.dnssec_valid = cached.authenticated;
            log.rcode = cached.rcode;
            let msg = Message {
                rcode: cached.rcode,
                answer: cached.answer,
                authority: cached.authority,
                additional: cached.additional,
                ..Message::default()
            };
            return (log, Ok(msg));
        }

        let mut msg = Message::query(q.clone());
        msg.set_edns0(EDNS_UDP_SIZE, self.config.dnssec_enabled);
        let addr = SocketAddr::new(authority.addr, DNS_PORT);
        let result = self.exchanger.exchange(&msg, addr).await;
        log.latency_ms = started.elapsed().as_millis() as u64;
        let r = match result {
            Ok(r) => r,
            Err(err) => return (log, Err(err)),
        };
        log.rcode = r.rcode;
        log.truncated = r.truncated;

        for section in [&r.answer, &r.authority] {
            if !rrset::in_bailiwick(section, &authority.zone) {
                return (log, Err(ResolveError::OutOfBailiwick));
            }
        }
        (log, Ok(r))
    }

    /// Fetch and vet the zone's DNSKEY RRset: every key tag goes into the
    /// map, and when a parent DS set exists the response must verify against
    /// its own keys and one KSK must reproduce a parent DS digest.
    async fn lookup_dnskey(
        &self,
        authority: &Nameserver,
        parent_ds_set: &[Record],
    ) -> (QueryLog, Result<(sig::KeyMap, Option<(Question, Answer)>)>) {
        let q = Question::new(&authority.zone, RecordType::DNSKEY);
        let (log, response) = self.query(&q, authority).await;
        let r = match response {
            Ok(r) => r,
            Err(err) => return (log, Err(err)),
        };
        if r.answer.is_empty() {
            return (log, Err(DnssecError::NoDnskey.into()));
        }
        if r.rcode != RCODE_NOERROR {
            return (log, Err(DnssecError::BadAnswer.into()));
        }

        let keys = sig::build_key_map(&r.answer);
        if keys.is_empty() {
            return (log, Err(DnssecError::NoDnskey.into()));
        }

        // Only the root zone, anchored via the cache, skips this.
        if !parent_ds_set.is_empty() {
            if let Err(err) = sig::verify_rrsig(&r, &keys, &*self.clock) {
                return (log, Err(err.into()));
            }
            if let Err(err) = sig::check_ds(&keys, parent_ds_set) {
                return (log, Err(err.into()));
            }
        }

        let cacheable = if log.cache_hit {
            None
        } else {
            Some((q, extract_answer_authenticated(r)))
        };
        (log, Ok((keys, cacheable)))
    }

    /// Validate `msg` against the authority zone's DNSKEYs. The DNSKEY
    /// response itself is cached only after the outer message verifies.
    async fn check_signatures(
        &self,
        msg: &Message,
        authority: &Nameserver,
        parent_ds_set: &[Record],
    ) -> (QueryLog, Result<()>) {
        let (mut log, keys) = self.lookup_dnskey(authority, parent_ds_set).await;
        let (keys, cacheable) = match keys {
            Ok(v) => v,
            Err(err) => return (log, Err(err)),
        };
        if let Err(err) = sig::verify_rrsig(msg, &keys, &*self.clock) {
            return (log, Err(err.into()));
        }
        log.dnssec_valid = true;
        if let Some((q, answer)) = cacheable {
            self.cache.add(&q, &answer, false);
        }
        (log, Ok(()))
    }

    /// NXDOMAIN must come with a name-error proof when the zone published
    /// denial records.
    fn check_name_error(&self, q: &Question, r: &Message) -> Result<()> {
        let set = denial::denial_set(&r.authority)?;
        if !set.is_empty() {
            denial::verify_name_error(q, &set)?;
        }
        Ok(())
    }

    /// A referral inside a signed parent needs either DS records for the new
    /// zone or an NSEC/NSEC3 proof of the delegation.
    fn check_delegation(
        &self,
        next: &Nameserver,
        r: &Message,
        parent_ds_set: &[Record],
    ) -> Result<()> {
        let set = denial::denial_set(&r.authority)?;
        if !set.is_empty() {
            denial::verify_delegation(&next.zone, &set)?;
            return Ok(());
        }
        let has_ds = !rrset::extract(&r.authority, &next.zone, &[RecordType::DS]).is_empty();
        if !has_ds && !parent_ds_set.is_empty() {
            return Err(DnssecError::UnsignedDelegation.into());
        }
        Ok(())
    }

    /// Choose the next authority from a referral's NS records and glue.
    /// Glue-less referrals resolve a nameserver address with a nested,
    /// depth-bounded lookup.
    async fn pick_authority(
        &self,
        auths: &[Record],
        extras: &[Record],
        depth: usize,
    ) -> Result<Nameserver> {
        let (zones, ns_to_zone) = self.split_auths_by_zone(auths, extras);

        if zones.is_empty() {
            if ns_to_zone.is_empty() {
                return Err(ResolveError::NoNsAuthorities);
            }
            let (ns_name, zone) = {
                let mut rng = rand::thread_rng();
                let entries: Vec<(&String, &String)> = ns_to_zone.iter().collect();
                let (n, z) = entries
                    .choose(&mut rng)
                    .ok_or(ResolveError::NoNsAuthorities)?;
                ((*n).clone(), (*z).clone())
            };
            let mut authority = self.lookup_ns(&ns_name, depth).await?;
            authority.zone = zone;
            return Ok(authority);
        }

        let mut rng = rand::thread_rng();
        let mut entries: Vec<(&String, &String)> = ns_to_zone.iter().collect();
        entries.shuffle(&mut rng);
        for (ns_name, zone) in entries {
            if let Some(addrs) = zones.get(zone) {
                if let Some(addr) = addrs.choose(&mut rng) {
                    return Ok(Nameserver {
                        name: ns_name.clone(),
                        addr: *addr,
                        zone: zone.clone(),
                    });
                }
            }
        }
        Err(ResolveError::NoNsAuthorities)
    }

    /// Index a referral's authority section: which nameservers serve which
    /// zone, and which glue addresses they come with.
    fn split_auths_by_zone(
        &self,
        auths: &[Record],
        extras: &[Record],
    ) -> (HashMap<String, Vec<IpAddr>>, HashMap<String, String>) {
        let mut ns_to_zone: HashMap<String, String> = HashMap::new();
        for record in auths {
            if let Some(target) = record.as_ns() {
                ns_to_zone.insert(target.to_string(), record.name.clone());
            }
        }
        let mut zones: HashMap<String, Vec<IpAddr>> = HashMap::new();
        for record in extras {
            let Some(zone) = ns_to_zone.get(&record.name) else {
                continue;
            };
            match &record.rdata {
                RData::A(a) => zones.entry(zone.clone()).or_default().push(IpAddr::V4(*a)),
                RData::AAAA(a) if self.config.use_ipv6 => {
                    zones.entry(zone.clone()).or_default().push(IpAddr::V6(*a))
                }
                _ => {}
            }
        }
        (zones, ns_to_zone)
    }

    /// Resolve an address for a glue-less nameserver. The nested lookup
    /// shares the cache but starts its own validation from the roots.
    async fn lookup_ns(&self, ns_name: &str, depth: usize) -> Result<Nameserver> {
        let question = Question::new(ns_name, RecordType::A);
        let (_, result) = self.lookup_at(question.clone(), depth + 1).await;
        let answer = result?;
        if answer.rcode != RCODE_NOERROR {
            return Err(ResolveError::AuthorityLookupFailed(
                ns_name.to_string(),
                answer.rcode,
            ));
        }
        let addresses = rrset::extract(&answer.answer, &question.name, &[RecordType::A]);
        let addr = {
            let mut rng = rand::thread_rng();
            addresses
                .choose(&mut rng)
                .and_then(|r| r.as_a())
                .ok_or(ResolveError::NoAuthorityAddress)?
        };
        Ok(Nameserver {
            name: question.name,
            addr: IpAddr::V4(addr),
            zone: String::new(),
        })
    }

    fn random_root(&self) -> Result<Nameserver> {
        let mut rng = rand::thread_rng();
        self.root_nameservers
            .choose(&mut rng)
            .cloned()
            .ok_or(ResolveError::NoNsAuthorities)
    }
}

fn extract_answer(m: Message, authenticated: bool) -> Answer {
    Answer {
        answer: m.answer,
        authority: m.authority,
        additional: m.additional,
        rcode: m.rcode,
        authenticated,
    }
}

fn extract_answer_authenticated(m: Message) -> Answer {
    let mut a = extract_answer(m, true);
    a.rcode = RCODE_NOERROR;
    a
}

/// Collapse a CNAME chain starting at `qname`, returning the canonical name
/// and the chain records in traversal order. An empty canonical name means
/// no chain starts at `qname`.
fn collapse_cname_chain(qname: &str, records: &[&Record]) -> (String, Vec<Record>) {
    let mut sname = qname.to_string();
    let mut chased = Vec::new();
    // Each step consumes a distinct link, which bounds in-response cycles.
    while chased.len() < records.len() {
        let next = records.iter().find_map(|r| {
            r.as_cname()
                .filter(|_| r.name.eq_ignore_ascii_case(&sname))
                .map(|target| (target.to_string(), (*r).clone()))
        });
        match next {
            Some((target, record)) => {
                sname = target;
                chased.push(record);
            }
            None => break,
        }
    }
    if sname.eq_ignore_ascii_case(qname) {
        (String::new(), Vec::new())
    } else {
        (sname, chased)
    }
}

/// Decide whether a response's answer section is an alias to chase: a CNAME
/// chain rooted at the query name, or a DNAME over a strict ancestor of it.
/// Returns the substituted name and the records that were chased.
fn is_alias(answer: &[Record], q: &Question) -> Result<Option<(String, Vec<Record>)>> {
    let stripped = rrset::filter_out(answer, &[RecordType::RRSIG]);
    if stripped.is_empty() {
        return Ok(None);
    }

    if stripped.len() == 1 {
        let record = stripped[0];
        match &record.rdata {
            RData::CNAME(target)
                if q.qtype != RecordType::CNAME && record.name.eq_ignore_ascii_case(&q.name) =>
            {
                return Ok(Some((target.clone(), vec![record.clone()])));
            }
            RData::DNAME(target)
                if q.qtype != RecordType::DNAME
                    && name::is_strict_ancestor(&record.name, &q.name) =>
            {
                let prefix = &q.name[..q.name.len() - record.name.len()];
                let substituted = format!("{}{}", prefix, target);
                if substituted.len() > 255 {
                    return Err(ResolveError::DnameTooLong);
                }
                return Ok(Some((substituted, vec![record.clone()])));
            }
            _ => return Ok(None),
        }
    }

    if q.qtype != RecordType::CNAME && rrset::all_of_type(&stripped, RecordType::CNAME) {
        let (canonical, chased) = collapse_cname_chain(&q.name, &stripped);
        if !canonical.is_empty() {
            return Ok(Some((canonical, chased)));
        }
    }
    Ok(None)
}
