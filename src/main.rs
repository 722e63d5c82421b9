use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratatoskr::clock::SystemClock;
use ratatoskr::dns::enums::{RCODE_NOTIMP, RCODE_SERVFAIL};
use ratatoskr::dns::{decode_message, encode_message, Message, Question};
use ratatoskr::{hints, BasicCache, Resolver, ResolverConfig, UdpExchanger};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ratatoskr-worker")
        .build()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratatoskr=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ResolverConfig::from_env()?;
    info!(?config, "starting resolver");

    let clock = Arc::new(SystemClock);
    let cache = Arc::new(BasicCache::new(clock.clone()));
    cache.spawn_sweeper(config.sweep_interval);

    let exchanger = Arc::new(UdpExchanger::new(config.query_timeout));
    let resolver = Arc::new(Resolver::new(
        config.clone(),
        &hints::root_hints(),
        hints::root_trust_anchors(),
        cache,
        exchanger,
        clock,
    ));

    let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
    info!(addr = %config.bind_addr, "listening");

    let mut buf = vec![0u8; 4096];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "receive failed");
                continue;
            }
        };
        let packet = buf[..len].to_vec();
        let resolver = Arc::clone(&resolver);
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let request = match decode_message(&packet) {
                Ok(m) => m,
                Err(err) => {
                    debug!(%peer, %err, "dropping undecodable query");
                    return;
                }
            };
            let response = handle(&resolver, &request).await;
            if let Err(err) = socket.send_to(&encode_message(&response), peer).await {
                warn!(%peer, %err, "send failed");
            }
        });
    }
}

/// Map one client query to a single lookup: exactly one question, SERVFAIL
/// with the AD bit cleared on any resolution error, the inner rcode and
/// authentication flag otherwise.
async fn handle(resolver: &Resolver, request: &Message) -> Message {
    let mut reply = Message::reply_to(request);
    reply.recursion_available = true;

    if request.questions.len() != 1 {
        reply.rcode = RCODE_NOTIMP;
        return reply;
    }
    let question = Question::new(&request.questions[0].name, request.questions[0].qtype);

    let (log, result) = resolver.lookup(question.clone()).await;
    if let Ok(serialized) = serde_json::to_string(&log) {
        debug!(lookup = %serialized, "lookup finished");
    }

    match result {
        Ok(answer) => {
            reply.rcode = answer.rcode;
            reply.authenticated_data = answer.authenticated;
            reply.answer = answer.answer;
            reply.authority = answer.authority;
            reply.additional = answer.additional;
        }
        Err(err) => {
            error!(name = %question.name, qtype = %question.qtype, %err, "lookup failed");
            reply.rcode = RCODE_SERVFAIL;
            reply.authenticated_data = false;
        }
    }
    reply
}
