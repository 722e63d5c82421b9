//! End-to-end engine tests against a scripted in-memory network: referral
//! chains, alias chasing, bailiwick enforcement, and the DS→DNSKEY→RRSIG
//! chain of trust.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

use ratatoskr::clock::SystemClock;
use ratatoskr::dns::enums::{RecordType, RCODE_NOERROR, RCODE_NXDOMAIN};
use ratatoskr::dns::record::{Dnskey, Ds, RData, Rrsig, DNSKEY_FLAG_KSK};
use ratatoskr::dns::{name, Message, Question, Record};
use ratatoskr::dnssec::{key_tag_of, signed_data, DigestType};
use ratatoskr::errors::Result;
use ratatoskr::{
    AnswerCache, BasicCache, DnssecError, Exchanger, ResolveError, Resolver, ResolverConfig,
};

const ROOT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
const CHILD_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

type Handler = Arc<dyn Fn(&Message) -> Message + Send + Sync>;

/// Scripted network: one handler per nameserver address.
struct MockExchanger {
    handlers: HashMap<IpAddr, Handler>,
    exchanges: AtomicUsize,
}

impl MockExchanger {
    fn new(handlers: HashMap<IpAddr, Handler>) -> Self {
        Self {
            handlers,
            exchanges: AtomicUsize::new(0),
        }
    }

    fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchanger for MockExchanger {
    async fn exchange(&self, msg: &Message, addr: SocketAddr) -> Result<Message> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let handler = self
            .handlers
            .get(&addr.ip())
            .ok_or_else(|| ResolveError::Network(format!("no route to {addr}")))?;
        let mut response = handler(msg);
        response.id = msg.id;
        response.response = true;
        Ok(response)
    }
}

fn respond(msg: &Message, rcode: u8) -> Message {
    let mut r = Message::reply_to(msg);
    r.rcode = rcode;
    r
}

fn question_of(msg: &Message) -> (&str, RecordType) {
    let q = &msg.questions[0];
    (q.name.as_str(), q.qtype)
}

fn build_resolver(
    handlers: HashMap<IpAddr, Handler>,
    dnssec_enabled: bool,
    root_keys: Vec<Record>,
) -> (Resolver, Arc<MockExchanger>, Arc<BasicCache>) {
    let config = ResolverConfig {
        dnssec_enabled,
        ..ResolverConfig::default()
    };
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(BasicCache::new(clock.clone()));
    let exchanger = Arc::new(MockExchanger::new(handlers));
    let hints = vec![Record::a(
        "a.root-servers.net.",
        518400,
        Ipv4Addr::new(192, 0, 2, 1),
    )];
    let resolver = Resolver::new(
        config,
        &hints,
        root_keys,
        cache.clone(),
        exchanger.clone(),
        clock,
    );
    (resolver, exchanger, cache)
}

fn handler<F>(f: F) -> Handler
where
    F: Fn(&Message) -> Message + Send + Sync + 'static,
{
    Arc::new(f)
}

#[tokio::test]
async fn cname_and_target_in_one_response_is_final() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            r.answer = vec![
                Record::cname("a.com.", 300, "b.com."),
                Record::a("b.com.", 300, Ipv4Addr::new(192, 0, 2, 50)),
                Record::a("b.com.", 300, Ipv4Addr::new(192, 0, 2, 51)),
            ];
            r
        }),
    );
    let (resolver, exchanger, _) = build_resolver(handlers, false, Vec::new());

    let (_, result) = resolver.lookup(Question::new("a.com.", RecordType::A)).await;
    let answer = result.unwrap();
    assert_eq!(answer.rcode, RCODE_NOERROR);
    assert_eq!(answer.answer[0].rtype, RecordType::CNAME);
    assert_eq!(answer.answer[1].rtype, RecordType::A);
    assert_eq!(answer.answer.len(), 3);
    assert_eq!(exchanger.exchange_count(), 1);
}

#[tokio::test]
async fn cname_chase_prepends_chased_records() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            match question_of(msg) {
                ("a.com.", RecordType::A) => {
                    r.answer = vec![Record::cname("a.com.", 300, "b.com.")];
                }
                ("b.com.", RecordType::A) => {
                    r.answer = vec![Record::a("b.com.", 300, Ipv4Addr::new(192, 0, 2, 50))];
                }
                other => panic!("unexpected question {:?}", other),
            }
            r
        }),
    );
    let (resolver, _, _) = build_resolver(handlers, false, Vec::new());

    let (log, result) = resolver.lookup(Question::new("a.com.", RecordType::A)).await;
    let answer = result.unwrap();
    assert_eq!(answer.answer.len(), 2);
    assert_eq!(answer.answer[0].as_cname(), Some("b.com."));
    assert_eq!(
        answer.answer[1].as_a(),
        Some(Ipv4Addr::new(192, 0, 2, 50))
    );
    assert_eq!(log.composites.len(), 2);
}

#[tokio::test]
async fn three_link_cname_chain_collapses_in_order() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            match question_of(msg) {
                ("a.com.", RecordType::A) => {
                    r.answer = vec![
                        Record::cname("a.com.", 300, "b.com."),
                        Record::cname("b.com.", 300, "c.com."),
                        Record::cname("c.com.", 300, "d.com."),
                    ];
                }
                ("d.com.", RecordType::A) => {
                    r.answer = vec![Record::a("d.com.", 300, Ipv4Addr::new(192, 0, 2, 60))];
                }
                other => panic!("unexpected question {:?}", other),
            }
            r
        }),
    );
    let (resolver, _, _) = build_resolver(handlers, false, Vec::new());

    let (_, result) = resolver.lookup(Question::new("a.com.", RecordType::A)).await;
    let answer = result.unwrap();
    assert_eq!(answer.answer.len(), 4);
    assert_eq!(answer.answer[0].as_cname(), Some("b.com."));
    assert_eq!(answer.answer[1].as_cname(), Some("c.com."));
    assert_eq!(answer.answer[2].as_cname(), Some("d.com."));
    assert_eq!(
        answer.answer[3].as_a(),
        Some(Ipv4Addr::new(192, 0, 2, 60))
    );
}

#[tokio::test]
async fn alias_loop_is_detected() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            match question_of(msg) {
                ("a.com.", _) => r.answer = vec![Record::cname("a.com.", 300, "b.com.")],
                ("b.com.", _) => r.answer = vec![Record::cname("b.com.", 300, "a.com.")],
                other => panic!("unexpected question {:?}", other),
            }
            r
        }),
    );
    let (resolver, _, _) = build_resolver(handlers, false, Vec::new());

    let (_, result) = resolver.lookup(Question::new("a.com.", RecordType::A)).await;
    assert_eq!(result.unwrap_err(), ResolveError::AliasLoop);
}

#[tokio::test]
async fn referral_with_glue_reaches_child_zone() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            r.authority = vec![Record::ns("com.", 172800, "ns1.com.")];
            r.additional = vec![Record::a("ns1.com.", 172800, Ipv4Addr::new(192, 0, 2, 2))];
            r
        }),
    );
    handlers.insert(
        CHILD_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            r.answer = vec![Record::a("www.com.", 300, Ipv4Addr::new(203, 0, 113, 80))];
            r
        }),
    );
    let (resolver, exchanger, _) = build_resolver(handlers, false, Vec::new());

    let (log, result) = resolver.lookup(Question::new("www.com.", RecordType::A)).await;
    let answer = result.unwrap();
    assert_eq!(
        answer.answer[0].as_a(),
        Some(Ipv4Addr::new(203, 0, 113, 80))
    );
    assert!(!answer.authenticated);
    assert_eq!(exchanger.exchange_count(), 2);
    assert!(log.composites[0].referral);
}

#[tokio::test]
async fn referral_loop_hits_cap() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            r.authority = vec![Record::ns("com.", 172800, "ns1.com.")];
            r.additional = vec![Record::a("ns1.com.", 172800, Ipv4Addr::new(192, 0, 2, 1))];
            r
        }),
    );
    let (resolver, exchanger, _) = build_resolver(handlers, false, Vec::new());

    let (_, result) = resolver.lookup(Question::new("www.com.", RecordType::A)).await;
    assert_eq!(result.unwrap_err(), ResolveError::TooManyReferrals);
    // The loop budget bounds upstream exchanges.
    assert_eq!(exchanger.exchange_count(), 10);
}

#[tokio::test]
async fn out_of_bailiwick_records_abort() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            r.authority = vec![Record::ns("com.", 172800, "ns1.com.")];
            r.additional = vec![Record::a("ns1.com.", 172800, Ipv4Addr::new(192, 0, 2, 2))];
            r
        }),
    );
    handlers.insert(
        CHILD_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            r.answer = vec![
                Record::a("www.com.", 300, Ipv4Addr::new(203, 0, 113, 80)),
                Record::a("evil.net.", 300, Ipv4Addr::new(203, 0, 113, 66)),
            ];
            r
        }),
    );
    let (resolver, _, _) = build_resolver(handlers, false, Vec::new());

    let (_, result) = resolver.lookup(Question::new("www.com.", RecordType::A)).await;
    assert_eq!(result.unwrap_err(), ResolveError::OutOfBailiwick);
}

#[tokio::test]
async fn glueless_referral_resolves_nameserver_address() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            match question_of(msg) {
                ("www.com.", RecordType::A) => {
                    r.authority = vec![Record::ns("com.", 172800, "ns.glueless.org.")];
                }
                ("ns.glueless.org.", RecordType::A) => {
                    r.answer = vec![Record::a(
                        "ns.glueless.org.",
                        3600,
                        Ipv4Addr::new(192, 0, 2, 7),
                    )];
                }
                other => panic!("unexpected question {:?}", other),
            }
            r
        }),
    );
    handlers.insert(
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)),
        handler(|msg| {
            let mut r = respond(msg, RCODE_NOERROR);
            r.answer = vec![Record::a("www.com.", 300, Ipv4Addr::new(203, 0, 113, 80))];
            r
        }),
    );
    let (resolver, exchanger, _) = build_resolver(handlers, false, Vec::new());

    let (_, result) = resolver.lookup(Question::new("www.com.", RecordType::A)).await;
    let answer = result.unwrap();
    assert_eq!(
        answer.answer[0].as_a(),
        Some(Ipv4Addr::new(203, 0, 113, 80))
    );
    assert_eq!(exchanger.exchange_count(), 3);
}

#[tokio::test]
async fn nxdomain_without_denial_records_passes_through() {
    let mut handlers = HashMap::new();
    handlers.insert(
        ROOT_IP,
        handler(|msg| {
            let mut r = respond(msg, RCODE_NXDOMAIN);
            r.authority = vec![Record::new(
                ".",
                RecordType::SOA,
                86400,
                RData::SOA(ratatoskr::dns::record::Soa {
                    mname: "a.root-servers.net.".into(),
                    rname: "nstld.verisign-grs.com.".into(),
                    serial: 2024010100,
                    refresh: 1800,
                    retry: 900,
                    expire: 604800,
                    minimum: 86400,
                }),
            )];
            r
        }),
    );
    let (resolver, _, _) = build_resolver(handlers, false, Vec::new());

    let (_, result) = resolver
        .lookup(Question::new("no-such-tld-zzz.", RecordType::A))
        .await;
    let answer = result.unwrap();
    assert_eq!(answer.rcode, RCODE_NXDOMAIN);
    assert!(!answer.authenticated);
}

#[tokio::test]
async fn nodata_with_denial_records_is_proved() {
    use ratatoskr::dns::record::{Nsec3, NSEC3_HASH_SHA1};
    use ratatoskr::dnssec::denial::{nsec3_hash, nsec3_hash_label};

    let nodata_authority = |qtype_present: bool| {
        let salt = [0xAB, 0xCD];
        let mut bitmap = vec![RecordType::A, RecordType::SOA, RecordType::RRSIG];
        if qtype_present {
            bitmap.push(RecordType::TXT);
        }
        vec![
            Record::new(
                "quiet.example.",
                RecordType::SOA,
                3600,
                RData::SOA(ratatoskr::dns::record::Soa {
                    mname: "ns1.quiet.example.".into(),
                    rname: "hostmaster.quiet.example.".into(),
                    serial: 1,
                    refresh: 1800,
                    retry: 900,
                    expire: 604800,
                    minimum: 300,
                }),
            ),
            Record::new(
                format!(
                    "{}.quiet.example.",
                    nsec3_hash_label("quiet.example.", &salt, 1)
                ),
                RecordType::NSEC3,
                3600,
                RData::NSEC3(Nsec3 {
                    hash_algorithm: NSEC3_HASH_SHA1,
                    flags: 0,
                    iterations: 1,
                    salt: salt.to_vec(),
                    next_hashed: nsec3_hash("zz.quiet.example.", &salt, 1),
                    type_bitmap: bitmap,
                }),
            ),
        ]
    };

    for (qtype_present, expect_ok) in [(false, true), (true, false)] {
        let mut handlers = HashMap::new();
        let authority = nodata_authority(qtype_present);
        handlers.insert(
            ROOT_IP,
            handler(move |msg| {
                let mut r = respond(msg, RCODE_NOERROR);
                r.authority = authority.clone();
                r
            }),
        );
        let (resolver, _, _) = build_resolver(handlers, false, Vec::new());
        let (_, result) = resolver
            .lookup(Question::new("quiet.example.", RecordType::TXT))
            .await;
        if expect_ok {
            let answer = result.unwrap();
            assert_eq!(answer.rcode, RCODE_NOERROR);
            assert!(answer.answer.is_empty());
        } else {
            assert_eq!(
                result.unwrap_err(),
                ResolveError::Denial(ratatoskr::DenialError::TypeExists)
            );
        }
    }
}

// ---- DNSSEC chain fixtures ----

struct ZoneKey {
    pair: EcdsaKeyPair,
    record: Record,
    tag: u16,
}

fn generate_zone_key(owner: &str) -> ZoneKey {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
    let pair =
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng).unwrap();
    let dnskey = Dnskey {
        flags: DNSKEY_FLAG_KSK,
        protocol: 3,
        algorithm: 13,
        // DNSKEY holds the raw curve point, without ring's 0x04 prefix.
        public_key: pair.public_key().as_ref()[1..].to_vec(),
    };
    let tag = key_tag_of(&dnskey);
    ZoneKey {
        pair,
        record: Record::new(owner, RecordType::DNSKEY, 3600, RData::DNSKEY(dnskey)),
        tag,
    }
}

fn now_unix() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32
}

fn sign_rrset(key: &ZoneKey, signer: &str, records: &[Record]) -> Record {
    let refs: Vec<&Record> = records.iter().collect();
    let template = Rrsig {
        type_covered: records[0].rtype,
        algorithm: 13,
        labels: name::label_count(&records[0].name) as u8,
        original_ttl: records[0].ttl,
        expiration: now_unix().wrapping_add(3600),
        inception: now_unix().wrapping_sub(3600),
        key_tag: key.tag,
        signer_name: signer.to_string(),
        signature: Vec::new(),
    };
    let data = signed_data(&template, &refs);
    let rng = SystemRandom::new();
    let signature = key.pair.sign(&rng, &data).unwrap().as_ref().to_vec();
    Record::new(
        records[0].name.clone(),
        RecordType::RRSIG,
        records[0].ttl,
        RData::RRSIG(Rrsig {
            signature,
            ..template
        }),
    )
}

fn ds_for(key: &ZoneKey, digest_type: u8) -> Record {
    let dnskey = key.record.as_dnskey().unwrap();
    Record::new(
        key.record.name.clone(),
        RecordType::DS,
        3600,
        RData::DS(Ds {
            key_tag: key.tag,
            algorithm: 13,
            digest_type,
            digest: DigestType::Sha256.digest(&{
                let mut data = name::to_wire(&key.record.name);
                data.extend_from_slice(&dnskey.flags.to_be_bytes());
                data.push(dnskey.protocol);
                data.push(dnskey.algorithm);
                data.extend_from_slice(&dnskey.public_key);
                data
            }),
        }),
    )
}

/// Wire up a signed root and a signed `example.` child. `ds_digest_type`
/// controls whether the DS handed down by the root actually matches.
fn signed_network(ds_digest_type: u8) -> (Resolver, Arc<MockExchanger>, Arc<BasicCache>) {
    let root_key = Arc::new(generate_zone_key("."));
    let child_key = Arc::new(generate_zone_key("example."));

    let mut referral_authority = vec![
        Record::ns("example.", 172800, "ns1.example."),
        ds_for(&child_key, ds_digest_type),
    ];
    let ds_sig = sign_rrset(&root_key, ".", &referral_authority[1..]);
    referral_authority.push(ds_sig);

    let mut handlers: HashMap<IpAddr, Handler> = HashMap::new();
    {
        let referral_authority = referral_authority.clone();
        handlers.insert(
            ROOT_IP,
            handler(move |msg| {
                let mut r = respond(msg, RCODE_NOERROR);
                r.authority = referral_authority.clone();
                r.additional = vec![Record::a(
                    "ns1.example.",
                    172800,
                    Ipv4Addr::new(192, 0, 2, 2),
                )];
                r
            }),
        );
    }
    {
        let child_key = Arc::clone(&child_key);
        handlers.insert(
            CHILD_IP,
            handler(move |msg| {
                let mut r = respond(msg, RCODE_NOERROR);
                match question_of(msg) {
                    ("example.", RecordType::DNSKEY) => {
                        let keyset = vec![child_key.record.clone()];
                        let sig = sign_rrset(&child_key, "example.", &keyset);
                        r.answer = keyset;
                        r.answer.push(sig);
                    }
                    ("a.example.", RecordType::A) => {
                        let a_set =
                            vec![Record::a("a.example.", 300, Ipv4Addr::new(203, 0, 113, 5))];
                        let sig = sign_rrset(&child_key, "example.", &a_set);
                        r.answer = a_set;
                        r.answer.push(sig);
                    }
                    other => panic!("unexpected question {:?}", other),
                }
                r
            }),
        );
    }

    build_resolver(handlers, true, vec![root_key.record.clone()])
}

#[tokio::test]
async fn ds_dnskey_rrsig_chain_authenticates() {
    let (resolver, _, _) = signed_network(2);
    let (log, result) = resolver
        .lookup(Question::new("a.example.", RecordType::A))
        .await;
    let answer = result.unwrap();
    assert!(answer.authenticated);
    assert!(log.dnssec_valid);
    assert_eq!(
        answer.answer[0].as_a(),
        Some(Ipv4Addr::new(203, 0, 113, 5))
    );
}

#[tokio::test]
async fn ds_with_wrong_digest_type_fails_chain() {
    // SHA-256 digest bytes published under the SHA-1 digest type number.
    let (resolver, _, _) = signed_network(1);
    let (_, result) = resolver
        .lookup(Question::new("a.example.", RecordType::A))
        .await;
    assert_eq!(
        result.unwrap_err(),
        ResolveError::Dnssec(DnssecError::MismatchingDs)
    );
}

#[tokio::test]
async fn authenticated_answers_are_cached_and_reused() {
    let (resolver, exchanger, _) = signed_network(2);
    let q = Question::new("a.example.", RecordType::A);

    let (_, first) = resolver.lookup(q.clone()).await;
    assert!(first.unwrap().authenticated);
    let exchanges_after_first = exchanger.exchange_count();

    let (log, second) = resolver.lookup(q).await;
    let answer = second.unwrap();
    assert!(answer.authenticated);
    assert_eq!(exchanger.exchange_count(), exchanges_after_first);
    assert!(log.composites[0].cache_hit);
    assert!(log.dnssec_valid);
}

#[tokio::test]
async fn trust_anchor_is_preinstalled() {
    let (_, _, cache) = signed_network(2);
    let anchor = cache.get(&Question::new(".", RecordType::DNSKEY)).unwrap();
    assert!(anchor.authenticated);
    assert_eq!(anchor.answer.len(), 1);
    assert_eq!(anchor.answer[0].rtype, RecordType::DNSKEY);
}
