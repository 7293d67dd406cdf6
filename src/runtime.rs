use std::collections::HashMap;

/// Execution profile for one runtime tag.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeProfile {
    /// Container image the job runs in.
    pub image: &'static str,
    /// Where raw source is written inside the workspace.
    pub file_name: &'static str,
    /// Command used when the submission does not carry a build_cmd.
    pub default_build_cmd: &'static str,
    /// Dependency install command. `{deps}` is replaced with the
    /// space-joined package list; templates without the placeholder read
    /// their dependencies from a manifest file instead.
    pub install_template: Option<&'static str>,
}

/// Static mapping from lowercase runtime tag to its profile. Read-only
/// after process start; unknown tags resolve to the nodejs entry.
#[derive(Debug)]
pub struct RuntimeCatalog {
    entries: HashMap<&'static str, RuntimeProfile>,
}

pub const FALLBACK_RUNTIME: &str = "nodejs";

impl RuntimeCatalog {
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "python",
            RuntimeProfile {
                image: "python:3.11-slim",
                file_name: "main.py",
                default_build_cmd: "python main.py",
                install_template: Some("pip install {deps}"),
            },
        );
        entries.insert(
            "nodejs",
            RuntimeProfile {
                image: "node:20-slim",
                file_name: "index.js",
                default_build_cmd: "node index.js",
                install_template: Some("npm install"),
            },
        );
        entries.insert(
            "go",
            RuntimeProfile {
                image: "golang:1.22",
                file_name: "main.go",
                default_build_cmd: "go run main.go",
                install_template: None,
            },
        );
        entries.insert(
            "rust",
            RuntimeProfile {
                image: "rust:1.79-slim",
                file_name: "main.rs",
                default_build_cmd: "rustc main.rs -o main && ./main",
                install_template: None,
            },
        );
        entries.insert(
            "bash",
            RuntimeProfile {
                image: "bash:5",
                file_name: "script.sh",
                default_build_cmd: "bash script.sh",
                install_template: None,
            },
        );
        Self { entries }
    }

    /// Resolve a tag, falling back to the default entry for unknown tags.
    pub fn lookup(&self, tag: &str) -> &RuntimeProfile {
        let key = tag.trim().to_ascii_lowercase();
        self.entries
            .get(key.as_str())
            .unwrap_or_else(|| &self.entries[FALLBACK_RUNTIME])
    }

    /// Whether the tag names a known runtime (exact, case-insensitive).
    pub fn supports(&self, tag: &str) -> bool {
        let key = tag.trim().to_ascii_lowercase();
        self.entries.contains_key(key.as_str())
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

impl Default for RuntimeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
