//! Building candidate chains from a signer's certificate.
//!
//! Signature blocks carry every certificate of every signer in one flat sequence, and nothing
//! stops a block from embedding certificates that took no part in signing. A chain therefore
//! always starts at the certificate that produced the signature and grows by following issuer
//! names through the embedded certificates.

use x509_certificate::CapturedX509Certificate;
use x509_certificate::rfc3280::Name;

/// Subject/issuer identity used to link certificates.
pub trait CertificateIdentity {
    /// Distinguished name type
    type Name: PartialEq;

    /// Subject name
    fn subject(&self) -> &Self::Name;

    /// Issuer name
    fn issuer(&self) -> &Self::Name;

    /// Whether the certificate names itself as issuer.
    fn is_self_issued(&self) -> bool {
        self.subject() == self.issuer()
    }
}

impl CertificateIdentity for CapturedX509Certificate {
    type Name = Name;

    fn subject(&self) -> &Name {
        self.subject_name()
    }

    fn issuer(&self) -> &Name {
        self.issuer_name()
    }
}

/// Chain rooted at `leaf`, ordered leaf first.
///
/// Each step appends the first certificate in `certs` whose subject is the current issuer.
/// The walk stops at a self-issued certificate, at a missing issuer, or before a certificate
/// would repeat.
#[must_use]
pub fn chain_from_leaf<T>(leaf: &T, certs: &[T]) -> Vec<T>
where
    T: CertificateIdentity + Clone + PartialEq,
{
    let mut chain = vec![leaf.clone()];

    loop {
        let Some(current) = chain.last() else {
            break;
        };
        if current.is_self_issued() {
            break;
        }
        let next = certs
            .iter()
            .find(|&cert| cert.subject() == current.issuer() && !chain.contains(cert));
        match next {
            Some(cert) => chain.push(cert.clone()),
            None => break,
        }
    }

    chain
}
