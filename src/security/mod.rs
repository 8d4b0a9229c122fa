//! Signature verification for downloaded archives.
//!
//! Verification fails closed: an archive is accepted only when every payload entry is covered
//! by a signer whose certificate chain validates against the [`TrustStore`]. The checks run in
//! this order, so that cheap structural failures are reported before any cryptography runs:
//!
//! 1. signing metadata is present (`MANIFEST.MF`, an `.SF` with a matching block)
//! 2. every payload entry is listed by a signer and by the manifest
//! 3. `.SF` digests match the manifest
//! 4. entry digests match the manifest
//! 5. each block's CMS signature over its `.SF` verifies
//! 6. for every entry, some chain of a covering signer validates; chains start at the
//!    certificate that produced the signature, never at an unrelated embedded certificate

pub mod chain;
pub mod jar;
pub mod trust;

pub use chain::{CertificateIdentity, chain_from_leaf};
pub use trust::{TrustRecord, TrustStore, describe, fingerprint};

use cryptographic_message_syntax::{SignedData, SignerInfo};
use jar::{ManifestFile, MetadataKind, Signer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Seek};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use x509_certificate::CapturedX509Certificate;
use x509_certificate::certificate::certificate_is_subset_of;

/// Why an archive or certificate chain was rejected.
#[derive(Error, Debug)]
pub enum SignatureError {
    /// No usable signing metadata
    #[error("archive is not digitally signed")]
    NotSigned,

    /// Payload entries missing from every signer or from the manifest
    #[error("contains files that are not digitally signed: {}", entries.join(", "))]
    UnsignedEntries {
        /// Uncovered entry names
        entries: Vec<String>,
    },

    /// Entry bytes do not match the manifest digest
    #[error("entry '{name}' does not match its signed digest")]
    TamperedEntry {
        /// Entry name
        name: String,
    },

    /// Signature file disagrees with the manifest
    #[error("signature file {signature_file} does not match the manifest for '{entry}'")]
    ManifestMismatch {
        /// Signature file name
        signature_file: String,
        /// Manifest section name
        entry: String,
    },

    /// CMS block failed to parse or verify
    #[error("invalid signature block {block}: {reason}")]
    InvalidSignature {
        /// Block member name
        block: String,
        /// Underlying failure
        reason: String,
    },

    /// No certificate chain covering the entry validated
    #[error("entry '{name}' is not signed by a trusted certificate: {reason}")]
    Untrusted {
        /// Entry name
        name: String,
        /// Failure of the last chain tried
        reason: String,
    },

    /// Chain with no certificates
    #[error("empty certificate chain")]
    EmptyChain,

    /// A link in the chain is not signed by its successor
    #[error("certificate '{subject}' is not signed by '{issuer}': {reason}")]
    BrokenChain {
        /// Certificate being checked
        subject: String,
        /// Expected signer
        issuer: String,
        /// Underlying failure
        reason: String,
    },

    /// Certificate outside its validity period
    #[error("certificate '{subject}' is expired or not yet valid")]
    Expired {
        /// Certificate label
        subject: String,
    },

    /// Chain does not lead to a trusted root
    #[error("certificate '{subject}' does not chain to a trusted root")]
    UntrustedRoot {
        /// Last certificate in the chain
        subject: String,
    },

    /// Signing metadata that cannot be parsed
    #[error("malformed signing metadata {name}: {reason}")]
    Malformed {
        /// Member name
        name: String,
        /// Parse failure
        reason: String,
    },

    /// Reading the archive failed
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Zip container error
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// Checks signed archives against a [`TrustStore`].
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    trust: Arc<TrustStore>,
}

/// Verified signer: the `.SF` plus one chain per signer info of its block, leaf first.
struct VerifiedSigner {
    stem: String,
    signature_file: ManifestFile,
    chains: Vec<Vec<CapturedX509Certificate>>,
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, SignatureError> {
    let mut file = archive.by_name(name)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(data)
}

impl SignatureVerifier {
    /// Verifier backed by `trust`.
    #[must_use]
    pub const fn new(trust: Arc<TrustStore>) -> Self {
        Self {
            trust,
        }
    }

    /// The trust store in use.
    #[must_use]
    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    /// Validate one leaf-first chain.
    pub fn verify_chain(&self, chain: &[CapturedX509Certificate]) -> Result<(), SignatureError> {
        self.trust.verify(chain)
    }

    /// Verify a signed zip archive without extracting anything.
    pub fn verify_archive<R: Read + Seek>(&self, reader: R) -> Result<(), SignatureError> {
        let mut archive = zip::ZipArchive::new(reader)?;

        let mut manifest_name = None;
        let mut signature_files: BTreeMap<String, String> = BTreeMap::new();
        let mut blocks: BTreeMap<String, String> = BTreeMap::new();
        let mut payload = Vec::new();

        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if jar::is_metadata(&name) {
                match jar::classify(&name) {
                    MetadataKind::Manifest => manifest_name = Some(name),
                    MetadataKind::SignatureFile(stem) => {
                        signature_files.insert(stem, name);
                    }
                    MetadataKind::SignatureBlock(stem) => {
                        blocks.insert(stem, name);
                    }
                    MetadataKind::Other => {}
                }
            } else {
                payload.push(name);
            }
        }

        let Some(manifest_name) = manifest_name else {
            return Err(SignatureError::NotSigned);
        };

        let mut signers = Vec::new();
        for (stem, sf_name) in &signature_files {
            let Some(block_name) = blocks.get(stem) else {
                debug!(signature_file = %sf_name, "Signature file without a block, ignoring");
                continue;
            };
            let sf_bytes = read_entry(&mut archive, sf_name)?;
            signers.push(Signer {
                stem: stem.clone(),
                signature_file: ManifestFile::parse(sf_name, &sf_bytes)?,
                block: read_entry(&mut archive, block_name)?,
                block_name: block_name.clone(),
            });
        }
        if signers.is_empty() {
            return Err(SignatureError::NotSigned);
        }

        let manifest = ManifestFile::parse(&manifest_name, &read_entry(&mut archive, &manifest_name)?)?;

        let uncovered: Vec<String> = payload
            .iter()
            .filter(|name| {
                !manifest.entries.contains_key(name.as_str())
                    || !signers.iter().any(|s| s.covers(name))
            })
            .cloned()
            .collect();
        if !uncovered.is_empty() {
            return Err(SignatureError::UnsignedEntries {
                entries: uncovered,
            });
        }

        for signer in &signers {
            signer.check_manifest(&manifest)?;
        }

        for name in &payload {
            let section = &manifest.entries[name.as_str()];
            let digests = jar::digest_attributes(section, "-Digest");
            let data = read_entry(&mut archive, name)?;
            if !jar::digests_match(&digests, &data) {
                return Err(SignatureError::TamperedEntry {
                    name: name.clone(),
                });
            }
        }

        let verified = signers
            .into_iter()
            .map(verify_block)
            .collect::<Result<Vec<_>, _>>()?;

        self.check_trust(&payload, &verified)
    }

    fn check_trust(&self, payload: &[String], signers: &[VerifiedSigner]) -> Result<(), SignatureError> {
        let mut outcomes: HashMap<BTreeSet<&str>, Result<(), String>> = HashMap::new();

        for name in payload {
            let covering: BTreeSet<&str> = signers
                .iter()
                .filter(|s| s.signature_file.entries.contains_key(name.as_str()))
                .map(|s| s.stem.as_str())
                .collect();

            let outcome = outcomes.entry(covering.clone()).or_insert_with(|| {
                let chains = signers
                    .iter()
                    .filter(|s| covering.contains(s.stem.as_str()))
                    .flat_map(|s| s.chains.iter());

                let mut last_error = SignatureError::EmptyChain.to_string();
                for chain in chains {
                    match self.trust.verify(chain) {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            debug!(error = %e, "Certificate chain rejected");
                            last_error = e.to_string();
                        }
                    }
                }
                Err(last_error)
            });

            if let Err(reason) = outcome {
                warn!(entry = %name, reason = %reason, "Entry is not signed by a trusted certificate");
                return Err(SignatureError::Untrusted {
                    name: name.clone(),
                    reason: reason.clone(),
                });
            }
        }
        Ok(())
    }
}

fn verify_block(signer: Signer) -> Result<VerifiedSigner, SignatureError> {
    let invalid = |reason: String| SignatureError::InvalidSignature {
        block: signer.block_name.clone(),
        reason,
    };

    let signed_data = SignedData::parse_ber(&signer.block).map_err(|e| invalid(e.to_string()))?;
    let sf_bytes = signer.signature_file.raw.as_slice();

    let certificates: Vec<CapturedX509Certificate> = signed_data.certificates().cloned().collect();

    let mut signer_count = 0;
    let mut chains = Vec::new();
    for info in signed_data.signers() {
        signer_count += 1;
        let content = info.signed_content(Some(sf_bytes));
        info.verify_signature_with_signed_data_and_content(&signed_data, &content)
            .map_err(|e| invalid(e.to_string()))?;
        if info.signed_attributes().is_some() {
            info.verify_message_digest_with_content(sf_bytes)
                .map_err(|e| invalid(e.to_string()))?;
        }

        match signing_certificate(info, &certificates) {
            Some(leaf) => chains.push(chain_from_leaf(leaf, &certificates)),
            None => debug!(block = %signer.block_name, "Signer certificate not embedded"),
        }
    }
    if signer_count == 0 {
        return Err(invalid("no signer information".to_string()));
    }

    Ok(VerifiedSigner {
        stem: signer.stem,
        signature_file: signer.signature_file,
        chains,
    })
}

/// The embedded certificate a signer info names by issuer and serial number.
///
/// Uses the same first-match rule as the signature check, so the chain always starts at the
/// key that was actually verified.
fn signing_certificate<'a>(
    info: &SignerInfo,
    certificates: &'a [CapturedX509Certificate],
) -> Option<&'a CapturedX509Certificate> {
    let (issuer, serial) = info.certificate_issuer_and_serial()?;
    certificates.iter().find(|cert| {
        certificate_is_subset_of(serial, issuer, cert.serial_number_asn1(), cert.issuer_name())
    })
}
