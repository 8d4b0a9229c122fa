//! Throwaway certificates and detached CMS signatures.

use chrono::Duration;
use cryptographic_message_syntax::{SignedDataBuilder, SignerBuilder};
use x509_certificate::{
    CapturedX509Certificate, EcdsaCurve, InMemorySigningKeyPair, KeyAlgorithm,
    X509CertificateBuilder,
};

/// A self-signed P-256 certificate whose common name is `name`, valid for an hour from now.
pub fn self_signed_certificate(name: &str) -> (CapturedX509Certificate, InMemorySigningKeyPair) {
    certificate(name, Duration::hours(1))
}

/// A self-signed certificate whose validity ended before it started.
pub fn expired_certificate(name: &str) -> (CapturedX509Certificate, InMemorySigningKeyPair) {
    certificate(name, Duration::hours(-1))
}

fn certificate(
    name: &str,
    validity: Duration,
) -> (CapturedX509Certificate, InMemorySigningKeyPair) {
    let mut builder = X509CertificateBuilder::default();
    builder.subject().append_common_name_utf8_string(name).expect("common name");
    builder.validity_duration(validity);
    builder
        .create_with_random_keypair(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1))
        .expect("generate certificate")
}

/// DER `SignedData` over `content` (not embedded), signed by `key`/`cert`.
///
/// `extra` certificates are embedded ahead of the signer's own.
pub fn sign_detached(
    content: &[u8],
    cert: &CapturedX509Certificate,
    key: &InMemorySigningKeyPair,
    extra: &[CapturedX509Certificate],
) -> Vec<u8> {
    extra
        .iter()
        .fold(SignedDataBuilder::default().content_external(content.to_vec()), |builder, c| {
            builder.certificate(c.clone())
        })
        .signer(SignerBuilder::new(key, cert.clone()))
        .build_der()
        .expect("build signed data")
}
