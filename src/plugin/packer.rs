//! Packer heuristic: recognizable packer section names, compressed code
//! sections, import tables stripped down by a stub.

use serde::Deserialize;
use tracing::debug;

use crate::entropy::PACKED_THRESHOLD;
use crate::pe::PeImage;
use crate::plugin::{AnalysisPlugin, Severity, Verdict, VerdictBuilder};

const DEFAULT_MIN_IMPORTS: usize = 10;

// Section names written by known packer stubs.
const PACKER_SECTIONS: &[(&str, &str)] = &[
    ("UPX0", "UPX"),
    ("UPX1", "UPX"),
    ("UPX2", "UPX"),
    (".aspack", "ASPack"),
    (".adata", "ASPack"),
    ("pec1", "PECompact"),
    ("PEC2", "PECompact"),
    (".petite", "Petite"),
    ("MPRESS1", "MPRESS"),
    ("MPRESS2", "MPRESS"),
    (".vmp0", "VMProtect"),
    (".vmp1", "VMProtect"),
    (".vmp2", "VMProtect"),
    (".themida", "Themida"),
    ("nsp0", "NsPack"),
    ("nsp1", "NsPack"),
];

#[derive(Debug, Deserialize, Default)]
struct PackerConfig {
    entropy_threshold: Option<f64>,
    min_imports: Option<usize>,
}

/// Flags images that look packed: packer-branded section names, executable
/// sections with near-random content, and suspiciously small import tables.
pub struct PackerPlugin {
    entropy_threshold: f64,
    min_imports: usize,
}

impl PackerPlugin {
    pub fn new() -> Self {
        Self {
            entropy_threshold: PACKED_THRESHOLD,
            min_imports: DEFAULT_MIN_IMPORTS,
        }
    }
}

impl Default for PackerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisPlugin for PackerPlugin {
    fn id(&self) -> &'static str {
        "packer"
    }

    fn description(&self) -> &'static str {
        "Detects packed or obfuscated executables."
    }

    fn set_config(&mut self, config: &serde_json::Value) {
        let Ok(parsed) = serde_json::from_value::<PackerConfig>(config.clone()) else {
            debug!(id = self.id(), "configuration section malformed, keeping defaults");
            return;
        };
        if let Some(threshold) = parsed.entropy_threshold {
            self.entropy_threshold = threshold;
        }
        if let Some(min) = parsed.min_imports {
            self.min_imports = min;
        }
    }

    fn analyze(&self, image: &PeImage) -> Verdict {
        let mut verdict = VerdictBuilder::new();
        if !image.valid() {
            return verdict.build();
        }

        for section in image.sections() {
            let name = section.header.name();
            if let Some((_, packer)) = PACKER_SECTIONS.iter().find(|(n, _)| *n == name) {
                verdict.raise_severity(Severity::Suspicious);
                verdict.add_detail(format!(
                    "Section {} is characteristic of the {} packer.",
                    name, packer
                ));
            }
        }

        for (name, _) in image
            .section_table()
            .high_entropy_sections(image.data(), self.entropy_threshold)
        {
            verdict.raise_severity(Severity::Suspicious);
            verdict.add_detail(format!(
                "Executable section {} is possibly compressed or encrypted.",
                name
            ));
        }

        let import_count = image.imports().count();
        if import_count < self.min_imports {
            verdict.add_detail(format!(
                "The PE only imports {} function(s).",
                import_count
            ));
        }

        verdict.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_image_is_no_opinion() {
        let plugin = PackerPlugin::new();
        let image = PeImage::parse(vec![0u8; 32]);
        let verdict = plugin.analyze(&image);
        assert_eq!(verdict.severity, Severity::NoOpinion);
        assert!(verdict.details.is_empty());
    }

    #[test]
    fn test_config_overrides() {
        let mut plugin = PackerPlugin::new();
        plugin.set_config(&serde_json::json!({"entropy_threshold": 6.0, "min_imports": 3}));
        assert!((plugin.entropy_threshold - 6.0).abs() < 1e-9);
        assert_eq!(plugin.min_imports, 3);
    }

    #[test]
    fn test_known_packer_section_table() {
        assert!(PACKER_SECTIONS.iter().any(|(n, p)| *n == "UPX0" && *p == "UPX"));
        assert!(PACKER_SECTIONS.iter().all(|(n, _)| n.len() <= 8));
    }
}
