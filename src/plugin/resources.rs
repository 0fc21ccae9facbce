//! Resource heuristic: embedded files, encrypted blobs, oversized resources.

use serde::Deserialize;
use tracing::debug;

use crate::entropy::PACKED_THRESHOLD;
use crate::pe::PeImage;
use crate::plugin::{AnalysisPlugin, Severity, Verdict, VerdictBuilder};
use crate::sigs::{MagicScanner, SignatureMatcher};

const DEFAULT_RATIO_THRESHOLD: f64 = 0.75;

#[derive(Debug, Deserialize, Default)]
struct ResourcesConfig {
    entropy_threshold: Option<f64>,
    ratio_threshold: Option<f64>,
    rules: Option<String>,
}

/// Scans each resource's bytes against the signature rules and flags
/// embedded executables, documents, likely-encrypted blobs, and images that
/// are mostly resources.
pub struct ResourcesPlugin {
    matcher: Box<dyn SignatureMatcher + Send + Sync>,
    entropy_threshold: f64,
    ratio_threshold: f64,
}

impl ResourcesPlugin {
    pub fn new() -> Self {
        Self::with_matcher(Box::new(MagicScanner::builtin()))
    }

    /// Build with a caller-supplied matcher.
    pub fn with_matcher(matcher: Box<dyn SignatureMatcher + Send + Sync>) -> Self {
        Self {
            matcher,
            entropy_threshold: PACKED_THRESHOLD,
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
        }
    }
}

impl Default for ResourcesPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisPlugin for ResourcesPlugin {
    fn id(&self) -> &'static str {
        "resources"
    }

    fn description(&self) -> &'static str {
        "Analyzes the program's resources."
    }

    fn set_config(&mut self, config: &serde_json::Value) {
        let Ok(parsed) = serde_json::from_value::<ResourcesConfig>(config.clone()) else {
            debug!(id = self.id(), "configuration section malformed, keeping defaults");
            return;
        };
        if let Some(threshold) = parsed.entropy_threshold {
            self.entropy_threshold = threshold;
        }
        if let Some(threshold) = parsed.ratio_threshold {
            self.ratio_threshold = threshold;
        }
        if let Some(path) = parsed.rules {
            self.matcher.load_rules(std::path::Path::new(&path));
        }
    }

    fn analyze(&self, image: &PeImage) -> Verdict {
        let mut verdict = VerdictBuilder::new();
        let mut total_size = 0usize;

        for resource in image.resources() {
            total_size += resource.size();
            let matches = self.matcher.scan_bytes(resource.data(image.data()));

            if let Some(first) = matches.first() {
                match first.extension() {
                    Some(".exe") | Some(".sys") | Some(".cab") => {
                        verdict.raise_severity(Severity::Malicious);
                        verdict.add_detail(format!(
                            "Resource {} detected as a {}.",
                            resource.name,
                            first.description().unwrap_or("known file type")
                        ));
                    }
                    Some(".pdf") => {
                        verdict.raise_severity(Severity::Suspicious);
                        verdict.add_detail(format!(
                            "Resource {} detected as a PDF document.",
                            resource.name
                        ));
                    }
                    _ => {}
                }
            } else if resource.entropy(image.data()) > self.entropy_threshold {
                verdict.add_detail(format!(
                    "Resource {} is possibly compressed or encrypted.",
                    resource.name
                ));
            }
        }

        if image.file_size() > 0 {
            let ratio = total_size as f64 / image.file_size() as f64;
            if ratio > self.ratio_threshold {
                verdict.raise_severity(Severity::Suspicious);
                verdict.add_detail(format!(
                    "Resources amount for {:.1}% of the executable.",
                    ratio * 100.0
                ));
            }
        }

        verdict.build()
    }
}
