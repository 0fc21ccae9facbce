//! Import heuristic: API combinations associated with injection, debugger
//! evasion, and input capture.

use crate::pe::imports::ImportTable;
use crate::pe::PeImage;
use crate::plugin::{AnalysisPlugin, Severity, Verdict, VerdictBuilder};

struct ApiGroup {
    label: &'static str,
    functions: &'static [&'static str],
    // Hits needed before the group is reported.
    threshold: usize,
}

const API_GROUPS: &[ApiGroup] = &[
    ApiGroup {
        label: "process injection",
        functions: &[
            "WriteProcessMemory",
            "CreateRemoteThread",
            "VirtualAllocEx",
            "NtMapViewOfSection",
            "QueueUserAPC",
            "SetThreadContext",
        ],
        threshold: 2,
    },
    ApiGroup {
        label: "debugger evasion",
        functions: &[
            "IsDebuggerPresent",
            "CheckRemoteDebuggerPresent",
            "NtQueryInformationProcess",
            "OutputDebugStringA",
        ],
        threshold: 2,
    },
    ApiGroup {
        label: "keystroke capture",
        functions: &[
            "SetWindowsHookExA",
            "SetWindowsHookExW",
            "GetAsyncKeyState",
            "GetKeyboardState",
        ],
        threshold: 2,
    },
    ApiGroup {
        label: "runtime API resolution",
        functions: &["LoadLibraryA", "LoadLibraryW", "GetProcAddress"],
        threshold: 2,
    },
];

fn group_hits(table: &ImportTable, group: &ApiGroup) -> Vec<&'static str> {
    group
        .functions
        .iter()
        .copied()
        .filter(|name| table.has_symbol(name))
        .collect()
}

/// Raises Suspicious when an image imports several functions from the same
/// capability group.
pub struct ImportsPlugin;

impl ImportsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImportsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisPlugin for ImportsPlugin {
    fn id(&self) -> &'static str {
        "imports"
    }

    fn description(&self) -> &'static str {
        "Looks for suspicious API combinations in the import table."
    }

    fn analyze(&self, image: &PeImage) -> Verdict {
        let mut verdict = VerdictBuilder::new();
        if !image.valid() {
            return verdict.build();
        }

        let table = image.imports();
        for group in API_GROUPS {
            let hits = group_hits(table, group);
            if hits.len() >= group.threshold {
                verdict.raise_severity(Severity::Suspicious);
                verdict.add_detail(format!(
                    "The PE imports functions used for {}: {}.",
                    group.label,
                    hits.join(", ")
                ));
            }
        }

        verdict.build()
    }
}
