//! Static PE analyzer for malware triage.
//!
//! Given a file's bytes, the crate reconstructs the binary's structural
//! metadata (headers, sections, import/export tables, resources, TLS,
//! certificates, relocations, version info) and runs pluggable heuristics
//! that each emit a severity verdict with supporting evidence.
//!
//! ```no_run
//! use pescope::{PeImage, PluginRegistry, ALL_PLUGINS};
//!
//! let image = PeImage::from_path("sample.exe")?;
//! let mut registry = PluginRegistry::with_builtin_plugins();
//! for (id, verdict) in registry.run(&[ALL_PLUGINS], &serde_json::Value::Null, &image) {
//!     println!("{}: {:?}", id, verdict.severity);
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod bytes;
pub mod entropy;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod pe;
pub mod plugin;
pub mod sigs;

pub use bytes::{BoundsError, ByteSource};
pub use error::{PescopeError, Result};
pub use hashing::HashAlgorithm;
pub use pe::types::PeError;
pub use pe::PeImage;
pub use plugin::{
    AnalysisPlugin, PluginRegistry, Severity, Verdict, VerdictBuilder, ALL_PLUGINS,
    PLUGIN_API_VERSION,
};
pub use sigs::{identify_file_type, MagicScanner, SignatureMatch, SignatureMatcher};
