pub mod algorithm;
pub mod denial;
pub mod digest;
pub mod key_tag;
pub mod sig;

pub use algorithm::Algorithm;
pub use denial::{verify_delegation, verify_name_error, verify_nodata};
pub use digest::DigestType;
pub use key_tag::calculate_key_tag;
pub use sig::{build_key_map, check_ds, key_tag_of, signed_data, verify_rrsig, KeyMap};

/// EDNS0 buffer size advertised on DNSSEC queries (RFC 4035 §4.1).
pub const EDNS_UDP_SIZE: u16 = 4096;
