//! Analysis plugins and the pipeline that runs them.
//!
//! Each plugin inspects a parsed image and emits a [`Verdict`]. The pipeline
//! owns nothing about severity semantics: it selects plugins, applies their
//! configuration sections, isolates faults, and returns verdicts in
//! registration order.

pub mod imports;
pub mod packer;
pub mod resources;

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PescopeError, Result};
use crate::pe::PeImage;

/// Plugin interface revision accepted by the registry.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Selector that matches every registered plugin.
pub const ALL_PLUGINS: &str = "all";

/// Threat level attached to a verdict. The derived order is the severity
/// order: `NoOpinion < Safe < Suspicious < Malicious`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    NoOpinion,
    Safe,
    Suspicious,
    Malicious,
}

/// Immutable plugin output: a severity, an optional one-line summary, and
/// ordered supporting details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub severity: Severity,
    pub summary: Option<String>,
    pub details: Vec<String>,
}

impl Verdict {
    pub fn no_opinion() -> Self {
        Self {
            severity: Severity::NoOpinion,
            summary: None,
            details: Vec::new(),
        }
    }
}

/// Accumulates a verdict. `raise_severity` is monotonic: the final severity
/// is the maximum ever requested, and no call can lower it.
#[derive(Debug, Default)]
pub struct VerdictBuilder {
    severity: Option<Severity>,
    summary: Option<String>,
    details: Vec<String>,
}

impl VerdictBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_severity(&mut self, severity: Severity) -> &mut Self {
        self.severity = Some(match self.severity {
            Some(current) => current.max(severity),
            None => severity,
        });
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or(Severity::NoOpinion)
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) -> &mut Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn add_detail(&mut self, detail: impl Into<String>) -> &mut Self {
        self.details.push(detail.into());
        self
    }

    pub fn build(self) -> Verdict {
        Verdict {
            severity: self.severity.unwrap_or(Severity::NoOpinion),
            summary: self.summary,
            details: self.details,
        }
    }
}

/// A heuristic that inspects a parsed image.
pub trait AnalysisPlugin: Send + Sync {
    /// Stable identifier used for selection and configuration lookup.
    fn id(&self) -> &'static str;

    /// Human-readable one-line description.
    fn description(&self) -> &'static str;

    /// Interface revision this plugin was built against.
    fn api_version(&self) -> u32 {
        PLUGIN_API_VERSION
    }

    /// Apply this plugin's configuration section. Unknown keys are ignored.
    fn set_config(&mut self, _config: &serde_json::Value) {}

    fn analyze(&self, image: &PeImage) -> Verdict;
}

/// Explicitly constructed plugin collection. Plugins run in registration
/// order; there is no global registry.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn AnalysisPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled heuristics.
    pub fn with_builtin_plugins() -> Self {
        let mut registry = Self::new();
        // Builtins all target the current interface revision.
        let _ = registry.register(Box::new(resources::ResourcesPlugin::new()));
        let _ = registry.register(Box::new(packer::PackerPlugin::new()));
        let _ = registry.register(Box::new(imports::ImportsPlugin::new()));
        registry
    }

    /// Register a plugin, rejecting interface revisions the pipeline does
    /// not speak.
    pub fn register(&mut self, plugin: Box<dyn AnalysisPlugin>) -> Result<()> {
        if plugin.api_version() != PLUGIN_API_VERSION {
            warn!(
                id = plugin.id(),
                version = plugin.api_version(),
                "plugin rejected: unsupported interface revision"
            );
            return Err(PescopeError::PluginRejected {
                id: plugin.id().to_string(),
                reason: format!(
                    "interface revision {} (expected {})",
                    plugin.api_version(),
                    PLUGIN_API_VERSION
                ),
            });
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run the selected plugins against an image.
    ///
    /// `selected` is a list of plugin ids; the [`ALL_PLUGINS`] sentinel
    /// selects everything. `config` is an object keyed by plugin id whose
    /// sections are applied before analysis. A panicking plugin yields
    /// `NoOpinion` and never disturbs its neighbors. Results come back in
    /// registration order.
    pub fn run(
        &mut self,
        selected: &[&str],
        config: &serde_json::Value,
        image: &PeImage,
    ) -> Vec<(String, Verdict)> {
        let run_all = selected.iter().any(|s| *s == ALL_PLUGINS);
        let mut results = Vec::new();

        for plugin in &mut self.plugins {
            let id = plugin.id();
            if !run_all && !selected.contains(&id) {
                continue;
            }

            if let Some(section) = config.get(id) {
                plugin.set_config(section);
            }

            let verdict = match Self::run_isolated(&**plugin, image) {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(error = %err, "plugin panicked, recording no opinion");
                    Verdict::no_opinion()
                }
            };
            debug!(id, severity = ?verdict.severity, "plugin finished");
            results.push((id.to_string(), verdict));
        }

        results
    }

    /// Run a single plugin with panic isolation, mapping a panic to a
    /// `PluginFault` carrying the panic message.
    fn run_isolated(plugin: &dyn AnalysisPlugin, image: &PeImage) -> Result<Verdict> {
        catch_unwind(AssertUnwindSafe(|| plugin.analyze(image))).map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "opaque panic payload".to_string());
            PescopeError::PluginFault {
                id: plugin.id().to_string(),
                message,
            }
        })
    }
}
