use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};
use crate::runtime::RuntimeCatalog;

/// What the client handed us to run. The variant carries the one field that
/// is required for that submission type, so an ill-formed payload cannot be
/// represented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "submission_type", rename_all = "snake_case")]
pub enum Submission {
    GitRepo { git_link: String },
    RawCode { raw_code: String },
    CustomImage { docker_image: String },
}

impl Submission {
    pub fn kind(&self) -> &'static str {
        match self {
            Submission::GitRepo { .. } => "git_repo",
            Submission::RawCode { .. } => "raw_code",
            Submission::CustomImage { .. } => "custom_image",
        }
    }
}

/// Container memory reservation, parsed from `<N>MB` or `<N>GB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimit {
    megabytes: u64,
}

impl MemoryLimit {
    pub const DEFAULT_MB: u64 = 512;

    pub fn from_mb(megabytes: u64) -> Self {
        Self { megabytes }
    }

    pub fn megabytes(&self) -> u64 {
        self.megabytes
    }

    /// Flag value for `docker run --memory=`.
    pub fn docker_arg(&self) -> String {
        format!("{}m", self.megabytes)
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self::from_mb(Self::DEFAULT_MB)
    }
}

impl FromStr for MemoryLimit {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        let (digits, multiplier) = if let Some(d) = upper.strip_suffix("GB") {
            (d, 1024)
        } else if let Some(d) = upper.strip_suffix("MB") {
            (d, 1)
        } else {
            return Err(KilnError::InvalidSubmission(format!(
                "memory_limit must be <N>MB or <N>GB, got {trimmed:?}"
            )));
        };
        let value: u64 = digits.trim().parse().map_err(|_| {
            KilnError::InvalidSubmission(format!("memory_limit has no numeric value: {trimmed:?}"))
        })?;
        if value == 0 {
            return Err(KilnError::InvalidSubmission(
                "memory_limit must be positive".to_string(),
            ));
        }
        Ok(Self::from_mb(value * multiplier))
    }
}

impl std::fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.megabytes % 1024 == 0 {
            write!(f, "{}GB", self.megabytes / 1024)
        } else {
            write!(f, "{}MB", self.megabytes)
        }
    }
}

impl Serialize for MemoryLimit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MemoryLimit {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;
pub const TIMEOUT_CAP_MS: u64 = 300_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Immutable payload of one execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(flatten)]
    pub submission: Submission,
    /// Tag into the runtime catalog. Ignored for custom images.
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub start_directory: Option<String>,
    #[serde(default)]
    pub initial_cmds: Vec<String>,
    /// Falls back to the runtime's default command when absent.
    #[serde(default)]
    pub build_cmd: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub memory_limit: MemoryLimit,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub submitted_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(submission: Submission, runtime: impl Into<String>) -> Self {
        Self {
            submission,
            runtime: runtime.into(),
            dependencies: Vec::new(),
            start_directory: None,
            initial_cmds: Vec::new(),
            build_cmd: None,
            env: BTreeMap::new(),
            memory_limit: MemoryLimit::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            submitted_at: Utc::now(),
        }
    }

    /// Submit-time validation. Field presence is guaranteed by the
    /// `Submission` union; this checks the value-level rules.
    pub fn validate(&self, catalog: &RuntimeCatalog, timeout_cap_ms: u64) -> Result<()> {
        if self.timeout_ms > timeout_cap_ms {
            return Err(KilnError::InvalidSubmission(format!(
                "timeout_ms {} exceeds the cap of {}",
                self.timeout_ms, timeout_cap_ms
            )));
        }
        if self.timeout_ms == 0 {
            return Err(KilnError::InvalidSubmission(
                "timeout_ms must be positive".to_string(),
            ));
        }
        match &self.submission {
            Submission::GitRepo { git_link } if git_link.trim().is_empty() => {
                return Err(KilnError::InvalidSubmission(
                    "git_link must not be empty".to_string(),
                ));
            }
            Submission::RawCode { raw_code } => {
                if raw_code.is_empty() {
                    return Err(KilnError::InvalidSubmission(
                        "raw_code must not be empty".to_string(),
                    ));
                }
                if !catalog.supports(&self.runtime) {
                    return Err(KilnError::InvalidSubmission(format!(
                        "unsupported runtime for raw_code: {:?}",
                        self.runtime
                    )));
                }
            }
            Submission::CustomImage { docker_image } if docker_image.trim().is_empty() => {
                return Err(KilnError::InvalidSubmission(
                    "docker_image must not be empty".to_string(),
                ));
            }
            _ => {}
        }
        for name in self.env.keys() {
            if !is_valid_env_name(name) {
                return Err(KilnError::InvalidSubmission(format!(
                    "invalid environment variable name: {name:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Environment names must match `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
