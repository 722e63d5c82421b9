//! Compiled-in root zone bootstrap data: the root nameserver addresses and
//! the root DNSKEY trust anchors. `Resolver::new` accepts arbitrary
//! replacements for both; these are the stock values so the binary runs
//! without external files.

use std::net::{Ipv4Addr, Ipv6Addr};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::dns::enums::RecordType;
use crate::dns::record::{Dnskey, RData, Record, DNSKEY_FLAG_KSK};

const ROOT_TTL: u32 = 518400;

const ROOT_SERVERS: &[(&str, Ipv4Addr, Ipv6Addr)] = &[
    ("a.root-servers.net.", Ipv4Addr::new(198, 41, 0, 4), Ipv6Addr::new(0x2001, 0x503, 0xba3e, 0, 0, 0, 0x2, 0x30)),
    ("b.root-servers.net.", Ipv4Addr::new(170, 247, 170, 2), Ipv6Addr::new(0x2801, 0x1b8, 0x10, 0, 0, 0, 0, 0xb)),
    ("c.root-servers.net.", Ipv4Addr::new(192, 33, 4, 12), Ipv6Addr::new(0x2001, 0x500, 0x2, 0, 0, 0, 0, 0xc)),
    ("d.root-servers.net.", Ipv4Addr::new(199, 7, 91, 13), Ipv6Addr::new(0x2001, 0x500, 0x2d, 0, 0, 0, 0, 0xd)),
    ("e.root-servers.net.", Ipv4Addr::new(192, 203, 230, 10), Ipv6Addr::new(0x2001, 0x500, 0xa8, 0, 0, 0, 0, 0xe)),
    ("f.root-servers.net.", Ipv4Addr::new(192, 5, 5, 241), Ipv6Addr::new(0x2001, 0x500, 0x2f, 0, 0, 0, 0, 0xf)),
    ("g.root-servers.net.", Ipv4Addr::new(192, 112, 36, 4), Ipv6Addr::new(0x2001, 0x500, 0x12, 0, 0, 0, 0, 0xd0d)),
    ("h.root-servers.net.", Ipv4Addr::new(198, 97, 190, 53), Ipv6Addr::new(0x2001, 0x500, 0x1, 0, 0, 0, 0, 0x53)),
    ("i.root-servers.net.", Ipv4Addr::new(192, 36, 148, 17), Ipv6Addr::new(0x2001, 0x7fe, 0, 0, 0, 0, 0, 0x53)),
    ("j.root-servers.net.", Ipv4Addr::new(192, 58, 128, 30), Ipv6Addr::new(0x2001, 0x503, 0xc27, 0, 0, 0, 0x2, 0x30)),
    ("k.root-servers.net.", Ipv4Addr::new(193, 0, 14, 129), Ipv6Addr::new(0x2001, 0x7fd, 0, 0, 0, 0, 0, 0x1)),
    ("l.root-servers.net.", Ipv4Addr::new(199, 7, 83, 42), Ipv6Addr::new(0x2001, 0x500, 0x9f, 0, 0, 0, 0, 0x42)),
    ("m.root-servers.net.", Ipv4Addr::new(202, 12, 27, 33), Ipv6Addr::new(0x2001, 0xdc3, 0, 0, 0, 0, 0, 0x35)),
];

// Root KSK-2017 (key tag 20326) and KSK-2010 (key tag 19036), from the IANA
// root anchors publication.
const ROOT_KSK_2017: &str = "AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3\
                             +/4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kv\
                             ArMtNROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF\
                             0jLHwVN8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+e\
                             oZG+SrDK6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfd\
                             RUfhHdY6+cn8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwN\
                             R1AkUTV74bU=";
const ROOT_KSK_2010: &str = "AwEAAagAIKlVZrpC6Ia7gEzahOR+9W29euxhJhVVLOyQbSEW0O8gcCjF\
                             FVQUTf6v58fLjwBd0YI0EzrAcQqBGCzh/RStIoO8g0NfnfL2MTJRkxoX\
                             bfDaUeVPQuYEhg37NZWAJQ9VnMVDxP/VHL496M/QZxkjf5/Efucp2gaD\
                             X6RS6CXpoY68LsvPVjR0ZSwzz1apAzvN9dlzEheX7ICJBBtuA6G3LQpz\
                             W5hOA2hzCTMjJPJ8LbqF6dsV6DoBQzgul0sGIcGOYl7OyQdXfZ57relS\
                             Qageu+ipAdTTJ25AsRTAoub8ONGcLmqrAmRLKBP1dfwhYB4N7knNnulq\
                             QxA+Uk1ihz0=";

/// Root zone NS/A/AAAA bootstrap records in the shape the resolver's
/// constructor expects (the `named.root` content, compiled in).
pub fn root_hints() -> Vec<Record> {
    let mut records = Vec::with_capacity(ROOT_SERVERS.len() * 3);
    for (host, v4, v6) in ROOT_SERVERS {
        records.push(Record::ns(".", ROOT_TTL, *host));
        records.push(Record::a(*host, ROOT_TTL, *v4));
        records.push(Record::aaaa(*host, ROOT_TTL, *v6));
    }
    records
}

/// The root DNSKEY trust anchors installed into the cache at construction.
pub fn root_trust_anchors() -> Vec<Record> {
    [ROOT_KSK_2017, ROOT_KSK_2010]
        .iter()
        .map(|b64| {
            let public_key = STANDARD.decode(b64).expect("embedded root key decodes");
            Record::new(
                ".",
                RecordType::DNSKEY,
                ROOT_TTL,
                RData::DNSKEY(Dnskey {
                    flags: DNSKEY_FLAG_KSK,
                    protocol: 3,
                    algorithm: 8,
                    public_key,
                }),
            )
        })
        .collect()
}
