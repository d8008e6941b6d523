// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # unparanoid
//!
//! Static reversal of [Paranoid](https://github.com/MichaelRocks/paranoid) string
//! encryption in disassembled Android apps.
//!
//! Paranoid rewrites every string literal of an app into a call to a generated accessor
//! that rebuilds the string at runtime from a table of scrambled chunks. `unparanoid`
//! reads the smali produced by baksmali or apktool, recovers every string without
//! running anything, and writes the literal back in place of the call.
//!
//! ## Features
//!
//! - **🔍 Name-independent detection** - Decoders are found by signature shape and
//!   scheme fingerprint, so minified runtimes are handled
//! - **⚡ Parallel** - Files are scanned and rewritten on a rayon pool
//! - **🛡️ Byte-preserving** - Every byte outside a rewritten call site is kept as is;
//!   files are replaced atomically
//! - **📊 Fully reported** - Every call site is accounted for, with the reason when it
//!   could not be decoded
//! - **🧩 Versioned schemes** - Decoders live behind the [`deobfuscation::Decoder`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use unparanoid::prelude::*;
//! use std::path::Path;
//!
//! let engine = DeobfuscationEngine::new(EngineConfig::default());
//! let report = engine.process(Path::new("app/smali"))?;
//! println!("{}", report.summary());
//! # Ok::<(), unparanoid::Error>(())
//! ```
//!
//! Single strings can be decoded directly:
//!
//! ```rust
//! use unparanoid::deobfuscation::scheme::v1;
//! use unparanoid::smali::JavaString;
//!
//! let chunks = [JavaString::from_vec(vec![0xfffa, 0xffb7, 0xff9a, 0xff93, 0xff93, 0xff90])];
//! let plain = v1::decode(-0xffff_fff9, &chunks)?;
//! assert_eq!(plain.to_string_lossy(), "Hello");
//! # Ok::<(), unparanoid::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`smali`] - Lossless line model of smali text, instruction subset, literals
//! - [`deobfuscation`] - Scanner, index, locator, decoders, patcher and the engine
//! - [`prelude`] - Convenient re-exports
//! - [`Error`] and [`Result`] - Error handling

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use unparanoid::prelude::*;
///
/// let engine = DeobfuscationEngine::new(EngineConfig::strict());
/// let report = engine.process("app/smali".as_ref())?;
/// assert!(report.is_clean());
/// # Ok::<(), unparanoid::Error>(())
/// ```
pub mod prelude;

/// Smali text model.
///
/// Files are parsed into lines with byte spans, so that rewrites can replace exactly the
/// bytes of an instruction and nothing else.
///
/// # Examples
///
/// ```rust
/// use unparanoid::smali::SmaliFile;
///
/// let file = SmaliFile::parse(".class public La/B;\n.super Ljava/lang/Object;\n")?;
/// assert_eq!(file.class.as_str(), "La/B;");
/// # Ok::<(), unparanoid::Error>(())
/// ```
pub mod smali;

/// Paranoid decoder discovery, string recovery and source rewriting.
pub mod deobfuscation;

/// `unparanoid` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `unparanoid` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use unparanoid::{Error, deobfuscation::DeobfuscationEngine};
///
/// match DeobfuscationEngine::default().process("app/smali".as_ref()) {
///     Ok(report) => println!("{}", report.summary()),
///     Err(Error::Cancelled) => println!("cancelled"),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;
