//! JAR-style signing metadata.
//!
//! A signed archive carries, under `META-INF/`:
//!
//! - `MANIFEST.MF`: one section per entry with a base64 digest of the entry's bytes
//! - `<SIGNER>.SF`: a signature file with digests of the manifest (whole and per section)
//! - `<SIGNER>.RSA` / `.DSA` / `.EC`: a CMS `SignedData` over the `.SF` bytes, carrying the
//!   signer's certificates
//!
//! This module parses the text formats and checks digests. CMS handling lives in
//! [`super::SignatureVerifier`].

use super::SignatureError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use digest::DynDigest;
use std::collections::BTreeMap;

/// Folder holding signing metadata; never treated as payload.
pub const META_INF: &str = "META-INF/";

/// Manifest path inside the archive.
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Whether an archive member name lies in the signing metadata folder.
#[must_use]
pub fn is_metadata(name: &str) -> bool {
    name.len() >= META_INF.len() && name[..META_INF.len()].eq_ignore_ascii_case(META_INF)
}

/// Extensions of CMS signature block files.
const BLOCK_EXTENSIONS: [&str; 3] = ["RSA", "DSA", "EC"];

/// Classification of a metadata member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataKind {
    /// `META-INF/MANIFEST.MF`
    Manifest,
    /// `META-INF/<stem>.SF`
    SignatureFile(String),
    /// `META-INF/<stem>.RSA|DSA|EC`
    SignatureBlock(String),
    /// Anything else (services, licences, ...)
    Other,
}

/// Classify a metadata member by name. Only top-level files of `META-INF/` count.
#[must_use]
pub fn classify(name: &str) -> MetadataKind {
    if !is_metadata(name) {
        return MetadataKind::Other;
    }
    let rest = &name[META_INF.len()..];
    if rest.contains('/') {
        return MetadataKind::Other;
    }
    if rest.eq_ignore_ascii_case("MANIFEST.MF") {
        return MetadataKind::Manifest;
    }
    match rest.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("SF") => {
            MetadataKind::SignatureFile(stem.to_ascii_uppercase())
        }
        Some((stem, ext)) if BLOCK_EXTENSIONS.iter().any(|b| ext.eq_ignore_ascii_case(b)) => {
            MetadataKind::SignatureBlock(stem.to_ascii_uppercase())
        }
        _ => MetadataKind::Other,
    }
}

/// One `Key: Value` section of a manifest or signature file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    /// Attributes in document order; keys compare case-insensitively
    pub attributes: Vec<(String, String)>,
    /// The section's raw bytes, including its terminating blank line
    pub raw: Vec<u8>,
}

impl Section {
    /// Attribute value by case-insensitive key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed manifest or signature file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestFile {
    /// Main section
    pub main: Section,
    /// Entry sections keyed by their `Name` attribute
    pub entries: BTreeMap<String, Section>,
    /// The complete document bytes
    pub raw: Vec<u8>,
}

fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'\n' => {
                lines.push(&data[start..=i]);
                start = i + 1;
            }
            b'\r' if data.get(i + 1) != Some(&b'\n') => {
                lines.push(&data[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

impl ManifestFile {
    /// Parse manifest-format bytes.
    ///
    /// Sections are separated by blank lines; a line starting with a single space continues
    /// the previous value.
    pub fn parse(name: &str, data: &[u8]) -> Result<Self, SignatureError> {
        let malformed = |reason: String| SignatureError::Malformed {
            name: name.to_string(),
            reason,
        };

        let mut sections: Vec<Section> = Vec::new();
        let mut current = Section::default();

        for line in split_lines(data) {
            let content = trim_eol(line);
            current.raw.extend_from_slice(line);

            if content.is_empty() {
                if !current.attributes.is_empty() || sections.is_empty() {
                    sections.push(std::mem::take(&mut current));
                } else {
                    current = Section::default();
                }
                continue;
            }

            let text = std::str::from_utf8(content)
                .map_err(|_| malformed("attribute is not valid UTF-8".to_string()))?;

            if let Some(continuation) = text.strip_prefix(' ') {
                let Some((_, value)) = current.attributes.last_mut() else {
                    return Err(malformed("continuation line without an attribute".to_string()));
                };
                value.push_str(continuation);
                continue;
            }

            let Some((key, value)) = text.split_once(':') else {
                return Err(malformed(format!("invalid attribute line '{text}'")));
            };
            current
                .attributes
                .push((key.trim().to_string(), value.strip_prefix(' ').unwrap_or(value).to_string()));
        }
        if !current.attributes.is_empty() || sections.is_empty() {
            sections.push(current);
        }

        let mut sections = sections.into_iter();
        let main = sections.next().unwrap_or_default();
        let mut entries = BTreeMap::new();
        for section in sections {
            let Some(entry_name) = section.get("Name").map(str::to_string) else {
                return Err(malformed("entry section without a Name attribute".to_string()));
            };
            entries.insert(entry_name, section);
        }

        Ok(Self {
            main,
            entries,
            raw: data.to_vec(),
        })
    }
}

/// Hasher for a JAR digest attribute prefix such as `SHA-256` or `SHA1`.
#[must_use]
pub fn hasher_for(algorithm: &str) -> Option<Box<dyn DynDigest>> {
    match algorithm.to_ascii_uppercase().replace('-', "").as_str() {
        "SHA256" => Some(Box::new(sha2::Sha256::default())),
        "SHA384" => Some(Box::new(sha2::Sha384::default())),
        "SHA512" => Some(Box::new(sha2::Sha512::default())),
        "SHA1" => Some(Box::new(sha1::Sha1::default())),
        "MD5" => Some(Box::new(md5::Md5::default())),
        _ => None,
    }
}

/// Find `<ALG><suffix>` digests in a section, strongest attribute first as written.
///
/// Returns `(algorithm, base64 value)` pairs for supported algorithms.
#[must_use]
pub fn digest_attributes<'a>(section: &'a Section, suffix: &str) -> Vec<(&'a str, &'a str)> {
    let suffix_lower = suffix.to_ascii_lowercase();
    section
        .attributes
        .iter()
        .filter_map(|(key, value)| {
            let lower = key.to_ascii_lowercase();
            if !lower.ends_with(&suffix_lower) {
                return None;
            }
            let algorithm = &key[..key.len() - suffix.len()];
            hasher_for(algorithm).map(|_| (algorithm, value.as_str()))
        })
        .collect()
}

/// Whether `data` matches any of the supplied `(algorithm, base64)` digests.
///
/// All supplied digests must match; an empty list never matches.
#[must_use]
pub fn digests_match(digests: &[(&str, &str)], data: &[u8]) -> bool {
    if digests.is_empty() {
        return false;
    }
    digests.iter().all(|(algorithm, expected)| {
        let Some(mut hasher) = hasher_for(algorithm) else {
            return false;
        };
        hasher.update(data);
        let actual = BASE64.encode(hasher.finalize());
        actual == expected.trim()
    })
}

/// A signature file paired with its block.
#[derive(Debug, Clone)]
pub struct Signer {
    /// Upper-case stem shared by the `.SF` and block files
    pub stem: String,
    /// Parsed `.SF`
    pub signature_file: ManifestFile,
    /// Raw block bytes (CMS `SignedData`)
    pub block: Vec<u8>,
    /// Block member name, for messages
    pub block_name: String,
}

impl Signer {
    /// Whether this signer's `.SF` lists `entry`.
    #[must_use]
    pub fn covers(&self, entry: &str) -> bool {
        self.signature_file.entries.contains_key(entry)
    }

    /// Check the `.SF` digests against the manifest.
    ///
    /// A matching whole-manifest digest vouches for every section. Otherwise each listed
    /// section digest must match the manifest section's raw bytes.
    pub fn check_manifest(&self, manifest: &ManifestFile) -> Result<(), SignatureError> {
        let whole = digest_attributes(&self.signature_file.main, "-Digest-Manifest");
        if digests_match(&whole, &manifest.raw) {
            return Ok(());
        }

        for (name, section) in &self.signature_file.entries {
            let Some(manifest_section) = manifest.entries.get(name) else {
                return Err(SignatureError::ManifestMismatch {
                    signature_file: format!("{}.SF", self.stem),
                    entry: name.clone(),
                });
            };
            let expected = digest_attributes(section, "-Digest");
            if !digests_match(&expected, &manifest_section.raw) {
                return Err(SignatureError::ManifestMismatch {
                    signature_file: format!("{}.SF", self.stem),
                    entry: name.clone(),
                });
            }
        }
        Ok(())
    }
}
