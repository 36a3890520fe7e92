use serde::{Deserialize, Serialize};

/// What to do when a derivative cannot be computed because a quad
/// neighbour never produced the operand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativePolicy {
    /// Use 0 and say nothing.
    #[default]
    Silent,
    /// Use 0 and add a low-severity diagnostic.
    Report,
}

/// Session options. Every field has a default so partial TOML files work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Upper bound on lock-step rounds before the session is stopped.
    pub max_steps: u64,
    pub derivative_policy: DerivativePolicy,
    /// Flag steps whose results contain NaN or infinity.
    pub report_nan_inf: bool,
    /// Include value changes of lanes other than the active one.
    pub record_all_lanes: bool,
    /// Clamp out-of-range dynamic indices; when off, the access reads zero
    /// and writes are dropped.
    pub clamp_indices: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            derivative_policy: DerivativePolicy::Silent,
            report_nan_inf: true,
            record_all_lanes: true,
            clamp_indices: true,
        }
    }
}
