use std::fmt;

use ring::signature;

use crate::errors::DnssecError;

/// DNSSEC signing algorithms the validator can verify (RFC 4034, 5155,
/// 5702, 6605, 8080).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// RSA/SHA-1 (RFC 3110)
    RsaSha1,
    /// RSASHA1-NSEC3-SHA1 (RFC 5155); same verification as RSA/SHA-1
    RsaSha1Nsec3Sha1,
    /// RSA/SHA-256 (RFC 5702)
    RsaSha256,
    /// RSA/SHA-512 (RFC 5702)
    RsaSha512,
    /// ECDSA P-256 with SHA-256 (RFC 6605)
    EcdsaP256Sha256,
    /// ECDSA P-384 with SHA-384 (RFC 6605)
    EcdsaP384Sha384,
    /// Ed25519 (RFC 8080)
    Ed25519,
}

impl Algorithm {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            5 => Some(Self::RsaSha1),
            7 => Some(Self::RsaSha1Nsec3Sha1),
            8 => Some(Self::RsaSha256),
            10 => Some(Self::RsaSha512),
            13 => Some(Self::EcdsaP256Sha256),
            14 => Some(Self::EcdsaP384Sha384),
            15 => Some(Self::Ed25519),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::RsaSha1 => 5,
            Self::RsaSha1Nsec3Sha1 => 7,
            Self::RsaSha256 => 8,
            Self::RsaSha512 => 10,
            Self::EcdsaP256Sha256 => 13,
            Self::EcdsaP384Sha384 => 14,
            Self::Ed25519 => 15,
        }
    }

    /// Verify `signature` over `signed_data` with a DNSKEY-format public key.
    ///
    /// DNSKEY packs keys differently from what ring expects: RSA keys carry
    /// their own exponent-length framing (RFC 3110 §2), ECDSA keys omit the
    /// uncompressed-point prefix and use fixed-width r|s signatures
    /// (RFC 6605 §4).
    pub fn verify(
        self,
        public_key: &[u8],
        signed_data: &[u8],
        signature: &[u8],
    ) -> Result<(), DnssecError> {
        match self {
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 => self.verify_rsa(
                &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
                public_key,
                signed_data,
                signature,
            ),
            Self::RsaSha256 => self.verify_rsa(
                &signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY,
                public_key,
                signed_data,
                signature,
            ),
            Self::RsaSha512 => self.verify_rsa(
                &signature::RSA_PKCS1_1024_8192_SHA512_FOR_LEGACY_USE_ONLY,
                public_key,
                signed_data,
                signature,
            ),
            Self::EcdsaP256Sha256 | Self::EcdsaP384Sha384 => {
                let alg: &'static dyn signature::VerificationAlgorithm =
                    if self == Self::EcdsaP256Sha256 {
                        &signature::ECDSA_P256_SHA256_FIXED
                    } else {
                        &signature::ECDSA_P384_SHA384_FIXED
                    };
                let mut key = Vec::with_capacity(public_key.len() + 1);
                key.push(0x04);
                key.extend_from_slice(public_key);
                signature::UnparsedPublicKey::new(alg, &key)
                    .verify(signed_data, signature)
                    .map_err(|_| DnssecError::VerificationFailed)
            }
            Self::Ed25519 => signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
                .verify(signed_data, signature)
                .map_err(|_| DnssecError::VerificationFailed),
        }
    }

    fn verify_rsa(
        self,
        params: &'static signature::RsaParameters,
        public_key: &[u8],
        signed_data: &[u8],
        signature: &[u8],
    ) -> Result<(), DnssecError> {
        let (n, e) = rsa_components(public_key).ok_or(DnssecError::VerificationFailed)?;
        signature::RsaPublicKeyComponents { n, e }
            .verify(params, signed_data, signature)
            .map_err(|_| DnssecError::VerificationFailed)
    }
}

/// Split an RFC 3110 DNSKEY public key into (modulus, exponent).
fn rsa_components(key: &[u8]) -> Option<(&[u8], &[u8])> {
    let (e_len, off) = match *key.first()? as usize {
        0 => {
            let hi = *key.get(1)? as usize;
            let lo = *key.get(2)? as usize;
            ((hi << 8) | lo, 3)
        }
        l => (l, 1),
    };
    let e = key.get(off..off + e_len)?;
    let n = key.get(off + e_len..)?;
    if n.is_empty() || e.is_empty() {
        return None;
    }
    Some((n, e))
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaSha1 => write!(f, "RSASHA1"),
            Self::RsaSha1Nsec3Sha1 => write!(f, "RSASHA1-NSEC3-SHA1"),
            Self::RsaSha256 => write!(f, "RSASHA256"),
            Self::RsaSha512 => write!(f, "RSASHA512"),
            Self::EcdsaP256Sha256 => write!(f, "ECDSAP256SHA256"),
            Self::EcdsaP384Sha384 => write!(f, "ECDSAP384SHA384"),
            Self::Ed25519 => write!(f, "ED25519"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_numbers_round_trip() {
        for v in [5u8, 7, 8, 10, 13, 14, 15] {
            assert_eq!(Algorithm::from_u8(v).unwrap().to_u8(), v);
        }
        assert!(Algorithm::from_u8(3).is_none());
        assert!(Algorithm::from_u8(253).is_none());
    }

    #[test]
    fn rsa_key_framing() {
        // One-byte exponent length
        let key = [1, 0x03, 0xAA, 0xBB];
        let (n, e) = rsa_components(&key).unwrap();
        assert_eq!(e, &[0x03]);
        assert_eq!(n, &[0xAA, 0xBB]);

        // Three-byte length form
        let mut long = vec![0, 0x01, 0x00];
        long.extend(std::iter::repeat(0x07).take(256));
        long.extend_from_slice(&[0xAA, 0xBB]);
        let (n, e) = rsa_components(&long).unwrap();
        assert_eq!(e.len(), 256);
        assert_eq!(n, &[0xAA, 0xBB]);

        assert!(rsa_components(&[]).is_none());
        assert!(rsa_components(&[2, 0x01]).is_none());
    }
}
