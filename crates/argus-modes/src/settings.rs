//! Mode settings table: per-mode cadence tiers and relative cost.
//!
//! The table is loaded once at startup from JSON. Validation happens at load
//! time and reports every problem in one pass; a table that parses but fails
//! validation never reaches the scheduler.

use crate::mode::{ModeTier, VisionMode};
use serde::Deserialize;
use thiserror::Error;

/// Configuration load/validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings document is not valid JSON.
    #[error("Mode settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// One or more entries are missing or malformed. All problems found in
    /// the document are aggregated here rather than failing on the first.
    #[error("Invalid mode settings: {}", issues.join("; "))]
    Invalid { issues: Vec<String> },
}

/// Cadence and cost configuration for a single mode.
///
/// Periods are "run every N ticks" counts and must be positive; the cost is
/// a relative weight (any positive scale) used to flatten per-tick load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeSetting {
    pub mode: VisionMode,
    pub low_period: u32,
    pub med_period: u32,
    pub high_period: u32,
    pub standard_period: u32,
    pub relative_cost: f32,
}

impl ModeSetting {
    /// Tick period for a requested tier.
    pub fn period_for(&self, tier: ModeTier) -> u32 {
        match tier {
            ModeTier::Low => self.low_period,
            ModeTier::Med => self.med_period,
            ModeTier::High => self.high_period,
            ModeTier::Standard => self.standard_period,
        }
    }
}

/// Raw JSON shape of one table entry, prior to validation.
#[derive(Debug, Deserialize)]
struct RawModeSetting {
    mode: String,
    low: Option<u32>,
    med: Option<u32>,
    high: Option<u32>,
    standard: Option<u32>,
    relative_cost: Option<f32>,
}

/// Static per-mode configuration, indexed by [`VisionMode`].
///
/// A valid table has exactly one entry per mode, so lookups are infallible
/// once construction succeeds.
#[derive(Debug, Clone)]
pub struct ModeCostTable {
    settings: [ModeSetting; VisionMode::COUNT],
}

impl ModeCostTable {
    /// Parse and validate a JSON settings document.
    ///
    /// The document is an array of entries:
    /// `[{"mode": "markers", "low": 4, "med": 2, "high": 1, "standard": 2,
    ///    "relative_cost": 10.0}, ...]`
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: Vec<RawModeSetting> = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// Build a table from already-validated settings.
    ///
    /// Fails with the same aggregated error as the JSON path if entries are
    /// duplicated, missing, or carry non-positive periods/costs.
    pub fn from_settings(
        settings: impl IntoIterator<Item = ModeSetting>,
    ) -> Result<Self, ConfigError> {
        let mut issues = Vec::new();
        let mut slots: [Option<ModeSetting>; VisionMode::COUNT] = [None; VisionMode::COUNT];

        for setting in settings {
            validate_setting(&setting, &mut issues);
            if slots[setting.mode.index()].replace(setting).is_some() {
                issues.push(format!("duplicate entry for mode {}", setting.mode));
            }
        }

        finish_table(slots, issues)
    }

    fn from_raw(raw: Vec<RawModeSetting>) -> Result<Self, ConfigError> {
        let mut issues = Vec::new();
        let mut slots: [Option<ModeSetting>; VisionMode::COUNT] = [None; VisionMode::COUNT];

        for entry in raw {
            let mode = match serde_json::from_value::<VisionMode>(serde_json::Value::String(
                entry.mode.clone(),
            )) {
                Ok(mode) => mode,
                Err(_) => {
                    issues.push(format!("unknown mode \"{}\"", entry.mode));
                    continue;
                },
            };

            let mut field = |name: &str, value: Option<u32>| -> u32 {
                match value {
                    Some(v) => v,
                    None => {
                        issues.push(format!("mode {mode}: missing field \"{name}\""));
                        0
                    },
                }
            };

            let setting = ModeSetting {
                mode,
                low_period: field("low", entry.low),
                med_period: field("med", entry.med),
                high_period: field("high", entry.high),
                standard_period: field("standard", entry.standard),
                relative_cost: match entry.relative_cost {
                    Some(c) => c,
                    None => {
                        issues.push(format!("mode {mode}: missing field \"relative_cost\""));
                        0.0
                    },
                },
            };
            validate_setting(&setting, &mut issues);

            if slots[mode.index()].replace(setting).is_some() {
                issues.push(format!("duplicate entry for mode {mode}"));
            }
        }

        finish_table(slots, issues)
    }

    pub fn setting(&self, mode: VisionMode) -> &ModeSetting {
        &self.settings[mode.index()]
    }

    pub fn relative_cost(&self, mode: VisionMode) -> f32 {
        self.settings[mode.index()].relative_cost
    }
}

fn validate_setting(setting: &ModeSetting, issues: &mut Vec<String>) {
    let mode = setting.mode;
    for (name, period) in [
        ("low", setting.low_period),
        ("med", setting.med_period),
        ("high", setting.high_period),
        ("standard", setting.standard_period),
    ] {
        if period == 0 {
            issues.push(format!("mode {mode}: {name} period must be positive"));
        }
    }
    if !(setting.relative_cost > 0.0) {
        issues.push(format!("mode {mode}: relative_cost must be positive"));
    }
}

fn finish_table(
    slots: [Option<ModeSetting>; VisionMode::COUNT],
    mut issues: Vec<String>,
) -> Result<ModeCostTable, ConfigError> {
    for mode in VisionMode::ALL {
        if slots[mode.index()].is_none() {
            issues.push(format!("no entry for mode {mode}"));
        }
    }

    if !issues.is_empty() {
        return Err(ConfigError::Invalid { issues });
    }

    // All slots verified present above
    let settings = slots.map(|s| match s {
        Some(s) => s,
        None => unreachable!("missing entries reported as issues"),
    });
    Ok(ModeCostTable { settings })
}

/// Table used across the crate's tests: every mode present, the cadences
/// from the observed robot config for the four main detectors.
#[cfg(test)]
pub(crate) fn test_table() -> ModeCostTable {
    let mut settings = Vec::new();
    for mode in VisionMode::ALL {
        settings.push(match mode {
            VisionMode::Markers | VisionMode::Faces => ModeSetting {
                mode,
                low_period: 4,
                med_period: 2,
                high_period: 1,
                standard_period: 2,
                relative_cost: 10.0,
            },
            VisionMode::Pets => ModeSetting {
                mode,
                low_period: 8,
                med_period: 4,
                high_period: 2,
                standard_period: 4,
                relative_cost: 10.0,
            },
            VisionMode::Motion => ModeSetting {
                mode,
                low_period: 4,
                med_period: 2,
                high_period: 1,
                standard_period: 2,
                relative_cost: 10.0,
            },
            _ => ModeSetting {
                mode,
                low_period: 8,
                med_period: 4,
                high_period: 2,
                standard_period: 4,
                relative_cost: 1.0,
            },
        });
    }
    ModeCostTable::from_settings(settings).unwrap()
}
