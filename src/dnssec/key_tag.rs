/// Key tag of a DNSKEY (RFC 4034 Appendix B): ones-complement-style checksum
/// over the DNSKEY RDATA.
pub fn calculate_key_tag(flags: u16, protocol: u8, algorithm: u8, public_key: &[u8]) -> u16 {
    let mut rdata = Vec::with_capacity(4 + public_key.len());
    rdata.extend_from_slice(&flags.to_be_bytes());
    rdata.push(protocol);
    rdata.push(algorithm);
    rdata.extend_from_slice(public_key);

    let mut acc: u32 = 0;
    for (i, &byte) in rdata.iter().enumerate() {
        if i % 2 == 0 {
            acc += u32::from(byte) << 8;
        } else {
            acc += u32::from(byte);
        }
    }
    acc += acc >> 16;
    (acc & 0xFFFF) as u16
}
