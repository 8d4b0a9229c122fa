//! Trust store: built-in roots plus user-accepted exceptions.
//!
//! Built-in roots come from a PEM bundle shipped with (or configured for) the launcher. For
//! custom update sources the user may explicitly accept individual certificates, by SHA-256
//! fingerprint, and file extensions that cannot carry signatures. Those choices live in the
//! trust record (`.launchpatch/trust.json`), which is only written by explicit user action
//! and never from manifest content.

use super::SignatureError;
use crate::utils::fs::atomic_write;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};
use x509_certificate::CapturedX509Certificate;

/// User-accepted trust exceptions for one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    /// SHA-256 fingerprints (lowercase hex) of accepted certificates
    #[serde(default)]
    pub accepted_certificates: BTreeSet<String>,
    /// Accepted file extensions (lowercase, no dot)
    #[serde(default)]
    pub accepted_extensions: BTreeSet<String>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrustRecord {
    /// Load the record; a missing file is an empty record.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse trust record: {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read trust record: {}", path.display())),
        }
    }

    /// Save the record atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize trust record")?;
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || atomic_write(&path_buf, content.as_bytes()))
            .await
            .context("spawn_blocking panicked")?
    }

    /// Accept a certificate by fingerprint. Returns false if it was already accepted.
    pub fn accept_certificate(&mut self, fingerprint: &str) -> bool {
        let added = self.accepted_certificates.insert(fingerprint.trim().to_ascii_lowercase());
        if added {
            self.updated_at = Some(Utc::now());
        }
        added
    }

    /// Accept a file extension. Returns false if it was already accepted.
    pub fn accept_extension(&mut self, extension: &str) -> bool {
        let extension = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        let added = self.accepted_extensions.insert(extension);
        if added {
            self.updated_at = Some(Utc::now());
        }
        added
    }
}

/// SHA-256 fingerprint (lowercase hex) of a certificate's DER encoding.
#[must_use]
pub fn fingerprint(cert: &CapturedX509Certificate) -> String {
    hex::encode(Sha256::digest(cert.constructed_data()))
}

/// Human-readable certificate label for messages.
#[must_use]
pub fn describe(cert: &CapturedX509Certificate) -> String {
    cert.subject_common_name().unwrap_or_else(|| fingerprint(cert))
}

/// Roots and accepted exceptions that certificate chains are validated against.
#[derive(Clone, Default)]
pub struct TrustStore {
    roots: Vec<CapturedX509Certificate>,
    record: TrustRecord,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("roots", &self.roots.iter().map(describe).collect::<Vec<_>>())
            .field("record", &self.record)
            .finish()
    }
}

impl TrustStore {
    /// A store trusting exactly `roots`.
    #[must_use]
    pub fn new(roots: Vec<CapturedX509Certificate>) -> Self {
        Self {
            roots,
            record: TrustRecord::default(),
        }
    }

    /// Parse roots from a PEM bundle.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let roots = CapturedX509Certificate::from_pem_multiple(pem)
            .context("Failed to parse trusted root certificates")?;
        debug!(roots = roots.len(), "Loaded trusted roots");
        Ok(Self::new(roots))
    }

    /// Load roots from an optional PEM file plus the installation's trust record.
    pub async fn load(roots_pem: Option<&Path>, record_path: &Path) -> Result<Self> {
        let mut store = match roots_pem {
            Some(path) => {
                let pem = tokio::fs::read(path).await.with_context(|| {
                    format!("Failed to read trusted roots: {}", path.display())
                })?;
                Self::from_pem(&pem)?
            }
            None => {
                warn!("No trusted roots configured; only accepted certificates will validate");
                Self::default()
            }
        };
        store.record = TrustRecord::load(record_path).await?;
        Ok(store)
    }

    /// Replace the accepted exceptions.
    #[must_use]
    pub fn with_record(mut self, record: TrustRecord) -> Self {
        self.record = record;
        self
    }

    /// Accepted exceptions in effect.
    #[must_use]
    pub const fn record(&self) -> &TrustRecord {
        &self.record
    }

    /// Whether the user accepted unverifiable files with this extension.
    #[must_use]
    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.record.accepted_extensions.contains(&extension.to_ascii_lowercase())
    }

    fn is_root(&self, cert: &CapturedX509Certificate) -> bool {
        self.roots.iter().any(|root| root.constructed_data() == cert.constructed_data())
    }

    /// Validate a chain ordered leaf first.
    ///
    /// The chain validates when a member's fingerprint was accepted by the user, or when every
    /// link is signed by its successor, every certificate is within its validity period, and
    /// the last certificate is a trusted root or is signed by one.
    pub fn verify(&self, chain: &[CapturedX509Certificate]) -> Result<(), SignatureError> {
        let Some(last) = chain.last() else {
            return Err(SignatureError::EmptyChain);
        };

        if let Some(accepted) =
            chain.iter().find(|c| self.record.accepted_certificates.contains(&fingerprint(c)))
        {
            debug!(certificate = %describe(accepted), "Certificate accepted by user");
            return Ok(());
        }

        for cert in chain {
            if !cert.time_constraints_valid(None) {
                return Err(SignatureError::Expired {
                    subject: describe(cert),
                });
            }
        }

        for pair in chain.windows(2) {
            pair[0].verify_signed_by_certificate(&pair[1]).map_err(|e| {
                SignatureError::BrokenChain {
                    subject: describe(&pair[0]),
                    issuer: describe(&pair[1]),
                    reason: e.to_string(),
                }
            })?;
        }

        if self.is_root(last) {
            return Ok(());
        }

        let anchored = self.roots.iter().any(|root| {
            root.subject_name() == last.issuer_name()
                && last.verify_signed_by_certificate(root).is_ok()
        });
        if anchored {
            Ok(())
        } else {
            Err(SignatureError::UntrustedRoot {
                subject: describe(last),
            })
        }
    }
}
