use thiserror::Error;

/// Failures of NSEC/NSEC3 denial of existence proofs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenialError {
    #[error("NSEC record doesn't match question")]
    Mismatch,
    #[error("NSEC record shows question type exists")]
    TypeExists,
    #[error("multiple NSEC records cover next closer/source of synthesis")]
    MultipleCoverage,
    #[error("NSEC record missing for expected encloser")]
    MissingCoverage,
    #[error("DS or SOA bit set in NSEC type map")]
    BadDelegation,
    #[error("NS bit not set in NSEC type map")]
    NsMissing,
    #[error("opt-out flag not set on covering NSEC3 record")]
    OptOutMissing,
    #[error("NSEC and NSEC3 records mixed in a single denial proof")]
    MixedRecords,
}

/// Failures while building or checking the DNSSEC chain of trust.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnssecError {
    #[error("no DNSKEY records found")]
    NoDnskey,
    #[error("no KSK DNSKEY found for DS records")]
    MissingKsk,
    #[error("failed to convert KSK DNSKEY record to DS record")]
    FailedToConvertKsk,
    #[error("KSK DNSKEY record does not match DS record from parent zone")]
    MismatchingDs,
    #[error("no RRSIG records for zone that should be signed")]
    NoSignatures,
    #[error("no matching DNSKEY found for RRSIG records")]
    MissingDnskey,
    #[error("records missing for signature")]
    MissingSignedRecords,
    #[error("incorrect signature validity period")]
    InvalidSignaturePeriod,
    #[error("unsupported DNSSEC algorithm: {0}")]
    UnsupportedAlgorithm(u8),
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("query response returned a non-zero RCODE")]
    BadAnswer,
    #[error("referral from signed zone carries neither DS nor denial records")]
    UnsignedDelegation,
}

/// Unified error surfaced by `Resolver::lookup`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("out of bailiwick record in message")]
    OutOfBailiwick,
    #[error("no NS authority records found")]
    NoNsAuthorities,
    #[error("no A/AAAA records found for the chosen authority")]
    NoAuthorityAddress,
    #[error("authority lookup for {0} failed with rcode {1}")]
    AuthorityLookupFailed(String, u8),
    #[error("too many referrals")]
    TooManyReferrals,
    #[error("alias loop detected")]
    AliasLoop,
    #[error("DNAME substitution exceeds maximum name length")]
    DnameTooLong,

    #[error("upstream exchange timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to decode DNS message: {0}")]
    Decode(String),

    #[error(transparent)]
    Denial(#[from] DenialError),
    #[error(transparent)]
    Dnssec(#[from] DnssecError),
}

pub type Result<T> = std::result::Result<T, ResolveError>;
