//! Ratatoskr is a recursive, validating, DNSSEC-aware DNS resolver: an
//! iterative resolution engine with a chain-of-trust validator, an
//! NSEC/NSEC3 denial-of-existence checker, and a TTL-driven question/answer
//! cache.

pub mod cache;
pub mod clock;
pub mod config;
pub mod dns;
pub mod dnssec;
pub mod errors;
pub mod hints;
pub mod resolver;
pub mod transport;

pub use cache::{AnswerCache, BasicCache};
pub use config::ResolverConfig;
pub use dns::{Message, Question, Record};
pub use errors::{DenialError, DnssecError, ResolveError};
pub use resolver::{Answer, LookupLog, Nameserver, QueryLog, Resolver};
pub use transport::{Exchanger, UdpExchanger};
