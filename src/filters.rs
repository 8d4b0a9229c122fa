//! Stream filter registry.
//!
//! Downloaded files may be compressed for transport. A file named `client.jar.lzma.gz` is a
//! gzip stream of an LZMA stream of `client.jar`. The registry maps such suffixes to
//! decoding transforms, strips them to recover the original file name, and opens a reader
//! that undoes every layer in order.
//!
//! The registry is an ordinary value constructed by the caller and passed to the components
//! that need it, so tests can register their own transforms.
//!
//! # Examples
//!
//! ```rust
//! use launchpatch::filters::FilterRegistry;
//!
//! let filters = FilterRegistry::with_defaults();
//! assert_eq!(filters.original_name("client.jar.lzma.gz"), "client.jar");
//! assert_eq!(filters.original_name("readme.txt"), "readme.txt");
//! ```

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

/// Boxed reader passed between filter layers.
pub type FilterReader = Box<dyn Read + Send>;

/// A decoding transform wrapping a reader.
pub type FilterFn = Arc<dyn Fn(FilterReader) -> io::Result<FilterReader> + Send + Sync>;

/// Suffix → transform mapping.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: Vec<(String, FilterFn)>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffixes: Vec<&str> = self.filters.iter().map(|(s, _)| s.as_str()).collect();
        f.debug_struct("FilterRegistry").field("suffixes", &suffixes).finish()
    }
}

impl FilterRegistry {
    /// An empty registry. No suffix is treated as compressed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `.gz`, `.lzma` and `.xz` decoders.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(".gz", |r| Ok(Box::new(GzDecoder::new(r)) as FilterReader));
        registry.register(".lzma", |r| {
            let stream = Stream::new_lzma_decoder(u64::MAX).map_err(io::Error::other)?;
            Ok(Box::new(XzDecoder::new_stream(r, stream)) as FilterReader)
        });
        registry.register(".xz", |r| Ok(Box::new(XzDecoder::new(r)) as FilterReader));
        registry
    }

    /// Register (or replace) the transform for `suffix`. Suffixes include the leading dot.
    pub fn register<F>(&mut self, suffix: &str, filter: F)
    where
        F: Fn(FilterReader) -> io::Result<FilterReader> + Send + Sync + 'static,
    {
        let suffix = suffix.to_ascii_lowercase();
        self.filters.retain(|(s, _)| *s != suffix);
        self.filters.push((suffix, Arc::new(filter)));
    }

    fn matching(&self, name: &str) -> Option<&(String, FilterFn)> {
        let lower = name.to_ascii_lowercase();
        self.filters
            .iter()
            .find(|(suffix, _)| lower.len() > suffix.len() && lower.ends_with(suffix.as_str()))
    }

    /// Strip every registered suffix from the end of `name`, outermost first.
    ///
    /// Returns the original name and the transforms to apply, in application order.
    #[must_use]
    pub fn strip(&self, name: &str) -> (String, Vec<FilterFn>) {
        let mut current = name.to_string();
        let mut chain = Vec::new();
        while let Some((suffix, filter)) = self.matching(&current) {
            current.truncate(current.len() - suffix.len());
            chain.push(Arc::clone(filter));
        }
        (current, chain)
    }

    /// The file name with all filter suffixes removed.
    #[must_use]
    pub fn original_name(&self, name: &str) -> String {
        self.strip(name).0
    }

    /// Wrap `reader` in every transform implied by `name`'s suffixes.
    pub fn wrap(&self, name: &str, reader: FilterReader) -> io::Result<FilterReader> {
        let (_, chain) = self.strip(name);
        chain.iter().try_fold(reader, |inner, filter| filter(inner))
    }

    /// Open `path` for reading through the transforms implied by `name`.
    pub fn open(&self, path: &Path, name: &str) -> Result<FilterReader> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open downloaded file: {}", path.display()))?;
        let reader: FilterReader = Box::new(BufReader::new(file));
        self.wrap(name, reader)
            .with_context(|| format!("Failed to set up decoding for {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};
    use xz2::stream::LzmaOptions;
    use xz2::write::XzEncoder;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn lzma(data: &[u8]) -> Vec<u8> {
        let options = LzmaOptions::new_preset(6).unwrap();
        let stream = Stream::new_lzma_encoder(&options).unwrap();
        let mut encoder = XzEncoder::new_stream(Vec::new(), stream);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(registry: &FilterRegistry, name: &str, data: Vec<u8>) -> Vec<u8> {
        let mut reader = registry.wrap(name, Box::new(Cursor::new(data))).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_strip_suffixes() {
        let registry = FilterRegistry::with_defaults();
        assert_eq!(registry.original_name("fileB.zip.gz"), "fileB.zip");
        assert_eq!(registry.original_name("a.jar.lzma.gz"), "a.jar");
        assert_eq!(registry.original_name("A.JAR.GZ"), "A.JAR");
        assert_eq!(registry.original_name(".gz"), ".gz");
        assert_eq!(FilterRegistry::new().original_name("fileB.zip.gz"), "fileB.zip.gz");
    }

    #[test]
    fn test_gzip_round_trip() {
        let registry = FilterRegistry::with_defaults();
        assert_eq!(read_all(&registry, "x.txt.gz", gzip(b"hello")), b"hello");
    }

    #[test]
    fn test_stacked_filters_apply_outermost_first() {
        let registry = FilterRegistry::with_defaults();
        let payload = b"stacked payload".to_vec();
        let encoded = gzip(&lzma(&payload));
        assert_eq!(read_all(&registry, "x.bin.lzma.gz", encoded), payload);
    }

    #[test]
    fn test_custom_filter() {
        let mut registry = FilterRegistry::new();
        registry.register(".upper", |mut r| {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            Ok(Box::new(Cursor::new(buf.to_ascii_uppercase())) as FilterReader)
        });
        assert_eq!(read_all(&registry, "x.upper", b"abc".to_vec()), b"ABC");
        assert_eq!(read_all(&registry, "x.txt", b"abc".to_vec()), b"abc");
    }
}
