//! Versioned decode schemes.
//!
//! Each supported obfuscator release is a [`Decoder`] implementation registered in a
//! [`DecoderRegistry`]. Decoders publish a constant fingerprint (64-bit literals that
//! their generated code is known to contain); the scanner matches candidate methods
//! against the registry to assign a [`SchemeVersion`]. Adding a scheme means adding a
//! variant and an implementation, nothing else in the pipeline changes.

use std::{collections::HashSet, fmt, sync::Arc};

use strum::{Display, EnumIter, EnumString};

use crate::{smali::JavaString, Error, Result};

pub mod v1;

pub use v1::ParanoidV1;

/// Known scheme versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SchemeVersion {
    /// Paranoid 0.3.x: chunked buffer, xoroshiro-style short PRNG.
    V1,
}

/// A pure function from `(key, chunks)` to plaintext for one scheme version.
pub trait Decoder: Send + Sync {
    /// The version this decoder implements.
    fn version(&self) -> SchemeVersion;

    /// Constants that identify generated decoder code of this version.
    ///
    /// A candidate matches when every constant appears in it or in its static callees.
    fn fingerprint(&self) -> &'static [u64];

    /// Recover the plaintext.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ChunkIndexOutOfRange`] or [`Error::ChunkOffsetOutOfRange`]
    /// when the key walks outside `chunks`.
    fn decode(&self, key: i64, chunks: &[JavaString]) -> Result<JavaString>;
}

/// The set of decoders available to a run.
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: Vec<Arc<dyn Decoder>>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.decoders.iter().map(|d| d.version()))
            .finish()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ParanoidV1));
        registry
    }
}

impl DecoderRegistry {
    /// Registry with every built-in decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no decoders; every descriptor will be unsupported.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// Add a decoder. A later registration for the same version replaces the earlier one.
    pub fn register(&mut self, decoder: Arc<dyn Decoder>) {
        self.decoders.retain(|d| d.version() != decoder.version());
        self.decoders.push(decoder);
    }

    /// Look up the decoder for a version.
    #[must_use]
    pub fn get(&self, version: SchemeVersion) -> Option<&dyn Decoder> {
        for decoder in &self.decoders {
            if decoder.version() == version {
                return Some(decoder.as_ref());
            }
        }
        None
    }

    /// Registered versions.
    pub fn versions(&self) -> impl Iterator<Item = SchemeVersion> + '_ {
        self.decoders.iter().map(|d| d.version())
    }

    /// Pick the scheme whose fingerprint is fully contained in `constants`.
    #[must_use]
    pub fn detect(&self, constants: &HashSet<u64>) -> Option<SchemeVersion> {
        self.decoders
            .iter()
            .find(|d| d.fingerprint().iter().all(|c| constants.contains(c)))
            .map(|d| d.version())
    }

    /// Returns `true` if `constant` belongs to any registered fingerprint.
    #[must_use]
    pub fn is_fingerprint_constant(&self, constant: u64) -> bool {
        self.decoders
            .iter()
            .any(|d| d.fingerprint().contains(&constant))
    }

    /// Decode with the scheme of a descriptor.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedSchemeVersion`] if `version` is `None` or not registered,
    /// otherwise whatever the decoder reports.
    pub fn decode(
        &self,
        version: Option<SchemeVersion>,
        decoder_name: &str,
        key: i64,
        chunks: &[JavaString],
    ) -> Result<JavaString> {
        let decoder = version
            .and_then(|v| self.get(v))
            .ok_or_else(|| Error::UnsupportedSchemeVersion {
                decoder: decoder_name.to_string(),
            })?;
        decoder.decode(key, chunks)
    }
}
