//! Threshold tables for channel classification.
//!
//! Thresholds are keyed by modulation (downstream power, SNR) or by DOCSIS
//! upstream version (upstream power). Every lookup resolves to *some* limit:
//! a missing key falls back to the table's `_default` entry, a missing table
//! or bound falls back to a hardcoded constant. Nothing in here fails once a
//! [`Thresholds`] value exists.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{json_kind, ThresholdError};

/// Threshold document compiled into the binary.
pub const BUNDLED_THRESHOLDS: &str = include_str!("../thresholds.json");

pub const DEFAULT_MODULATION: &str = "256QAM";
pub const UPSTREAM_DOCSIS_30: &str = "EuroDOCSIS 3.0";
pub const UPSTREAM_DOCSIS_31: &str = "DOCSIS 3.1";

const DEFAULT_KEY: &str = "_default";

const DS_POWER_FALLBACK: PowerLimits = PowerLimits {
    good_min: -4.0,
    good_max: 13.0,
    crit_min: -8.0,
    crit_max: 20.0,
};

const US_POWER_FALLBACK: PowerLimits = PowerLimits {
    good_min: 41.0,
    good_max: 47.0,
    crit_min: 35.0,
    crit_max: 53.0,
};

const SNR_FALLBACK: SnrLimits = SnrLimits {
    good_min: 33.0,
    crit_min: 29.0,
};

const UNCORRECTABLE_FALLBACK: f64 = 10_000.0;

/// Resolved power band in dBmV. Values outside `crit_*` are critical,
/// values outside `good_*` are a warning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerLimits {
    pub good_min: f64,
    pub good_max: f64,
    pub crit_min: f64,
    pub crit_max: f64,
}

/// Resolved SNR floor in dB. SNR has no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnrLimits {
    pub good_min: f64,
    pub crit_min: f64,
}

/// One entry of a threshold table as written in the document. Any bound
/// may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Band {
    pub good_min: Option<f64>,
    pub good_max: Option<f64>,
    pub immediate_min: Option<f64>,
    pub immediate_max: Option<f64>,
}

impl Band {
    fn from_object(object: &Map<String, Value>) -> Self {
        let bound = |name: &str| object.get(name).and_then(Value::as_f64);
        Self {
            good_min: bound("good_min"),
            good_max: bound("good_max"),
            immediate_min: bound("immediate_min"),
            immediate_max: bound("immediate_max"),
        }
    }
}

/// A category table: bands by key plus the name of the fallback key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdTable {
    pub default_key: Option<String>,
    pub bands: BTreeMap<String, Band>,
}

impl ThresholdTable {
    fn from_value(value: Option<&Value>) -> Self {
        let Some(Value::Object(object)) = value else {
            return Self::default();
        };

        let mut table = Self::default();
        for (key, entry) in object {
            if key == DEFAULT_KEY {
                table.default_key = entry.as_str().map(str::to_owned);
                continue;
            }
            if key.starts_with('_') {
                continue;
            }
            if let Value::Object(band) = entry {
                table.bands.insert(key.clone(), Band::from_object(band));
            }
        }
        table
    }

    /// Effective fallback key of this table.
    pub fn default_key_or<'a>(&'a self, hardcoded: &'a str) -> &'a str {
        self.default_key.as_deref().unwrap_or(hardcoded)
    }

    /// Band for `key`, or the table's default band when `key` isn't present.
    fn lookup(&self, key: Option<&str>, hardcoded_default: &str) -> Option<&Band> {
        let key = key
            .filter(|k| self.bands.contains_key(*k))
            .unwrap_or_else(|| self.default_key_or(hardcoded_default));
        self.bands.get(key)
    }
}

/// Read one bound, falling back to the hardcoded constant.
fn resolve(band: Option<&Band>, pick: fn(&Band) -> Option<f64>, hardcoded: f64) -> f64 {
    band.and_then(pick).unwrap_or(hardcoded)
}

fn power_limits(band: Option<&Band>, fallback: PowerLimits) -> PowerLimits {
    PowerLimits {
        good_min: resolve(band, |b| b.good_min, fallback.good_min),
        good_max: resolve(band, |b| b.good_max, fallback.good_max),
        crit_min: resolve(band, |b| b.immediate_min, fallback.crit_min),
        crit_max: resolve(band, |b| b.immediate_max, fallback.crit_max),
    }
}

fn snr_limits(band: Option<&Band>) -> SnrLimits {
    SnrLimits {
        good_min: resolve(band, |b| b.good_min, SNR_FALLBACK.good_min),
        crit_min: resolve(band, |b| b.immediate_min, SNR_FALLBACK.crit_min),
    }
}

/// Uppercase and strip hyphens, so "256-qam" and "256QAM" share a key.
pub fn normalize_modulation(raw: &str) -> String {
    raw.to_uppercase().replace('-', "")
}

/// Canonical upstream table key for a DOCSIS version string.
pub fn upstream_key(version: &str) -> Option<&'static str> {
    match version {
        "3.1" | UPSTREAM_DOCSIS_31 => Some(UPSTREAM_DOCSIS_31),
        "3.0" | UPSTREAM_DOCSIS_30 => Some(UPSTREAM_DOCSIS_30),
        _ => None,
    }
}

/// The full threshold set. Construct once at startup and pass by
/// reference into every analysis; it is never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    source: Option<String>,
    downstream_power: ThresholdTable,
    upstream_power: ThresholdTable,
    snr: ThresholdTable,
    uncorrectable_threshold: Option<f64>,
}

impl Default for Thresholds {
    /// The bundled reference table.
    fn default() -> Self {
        Self::parse(BUNDLED_THRESHOLDS).unwrap_or_else(|e| {
            warn!("Bundled thresholds are unusable ({}), using hardcoded limits", e);
            Self::empty()
        })
    }
}

impl Thresholds {
    /// A threshold set with no tables; every lookup uses hardcoded limits.
    pub fn empty() -> Self {
        Self {
            source: None,
            downstream_power: ThresholdTable::default(),
            upstream_power: ThresholdTable::default(),
            snr: ThresholdTable::default(),
            uncorrectable_threshold: None,
        }
    }

    /// Strictly parse a threshold document.
    ///
    /// Only the document as a whole must be a JSON object. Malformed tables,
    /// bands, or bounds inside it are ignored and resolve to fallbacks.
    pub fn parse(text: &str) -> Result<Self, ThresholdError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ThresholdError> {
        let Value::Object(document) = value else {
            return Err(ThresholdError::NotAnObject(json_kind(value)));
        };

        let uncorrectable_threshold = document
            .get("errors")
            .and_then(|errors| errors.get("uncorrectable_threshold"))
            .and_then(Value::as_f64);

        Ok(Self {
            source: document
                .get("_source")
                .and_then(Value::as_str)
                .map(str::to_owned),
            downstream_power: ThresholdTable::from_value(document.get("downstream_power")),
            upstream_power: ThresholdTable::from_value(document.get("upstream_power")),
            snr: ThresholdTable::from_value(document.get("snr")),
            uncorrectable_threshold,
        })
    }

    /// Parse a threshold document, falling back to hardcoded limits if it
    /// can't be used at all. Never fails.
    pub fn from_json_lenient(text: &str) -> Self {
        match Self::parse(text) {
            Ok(thresholds) => thresholds,
            Err(e) => {
                warn!("Could not load thresholds ({}), using defaults", e);
                Self::empty()
            }
        }
    }

    /// Free-form provenance note from the document's `_source` key.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Downstream power limits for an already normalized modulation.
    pub fn downstream_power(&self, modulation: &str) -> PowerLimits {
        let band = self
            .downstream_power
            .lookup(Some(modulation), DEFAULT_MODULATION);
        power_limits(band, DS_POWER_FALLBACK)
    }

    /// Upstream power limits for a DOCSIS version ("3.0", "DOCSIS 3.1", ...).
    /// Unknown or missing versions use the table default.
    pub fn upstream_power(&self, docsis_version: Option<&str>) -> PowerLimits {
        let band = self
            .upstream_power
            .lookup(docsis_version.and_then(upstream_key), UPSTREAM_DOCSIS_30);
        power_limits(band, US_POWER_FALLBACK)
    }

    /// SNR limits for an already normalized modulation.
    pub fn snr(&self, modulation: &str) -> SnrLimits {
        snr_limits(self.snr.lookup(Some(modulation), DEFAULT_MODULATION))
    }

    /// Total uncorrectable errors above which the connection is flagged.
    /// A configured value is used as written, even if fractional or negative.
    pub fn uncorrectable_threshold(&self) -> f64 {
        self.uncorrectable_threshold
            .unwrap_or(UNCORRECTABLE_FALLBACK)
    }

    /// Whether an uncorrectable error total exceeds the threshold.
    pub fn uncorrectable_exceeded(&self, total: u64) -> bool {
        total as f64 > self.uncorrectable_threshold()
    }

    /// Every limit as it would be applied, for display.
    pub fn effective(&self) -> EffectiveThresholds {
        let downstream_default = self.downstream_power.default_key_or(DEFAULT_MODULATION);
        let upstream_default = self.upstream_power.default_key_or(UPSTREAM_DOCSIS_30);
        let snr_default = self.snr.default_key_or(DEFAULT_MODULATION);

        EffectiveThresholds {
            source: self.source.clone(),
            downstream_power: EffectiveTable {
                default_key: downstream_default.to_owned(),
                default: self.downstream_power(downstream_default),
                bands: self
                    .downstream_power
                    .bands
                    .keys()
                    .map(|k| (k.clone(), self.downstream_power(k)))
                    .collect(),
            },
            upstream_power: EffectiveTable {
                default_key: upstream_default.to_owned(),
                default: self.upstream_power(None),
                bands: self
                    .upstream_power
                    .bands
                    .iter()
                    .map(|(k, band)| (k.clone(), power_limits(Some(band), US_POWER_FALLBACK)))
                    .collect(),
            },
            snr: EffectiveTable {
                default_key: snr_default.to_owned(),
                default: self.snr(snr_default),
                bands: self
                    .snr
                    .bands
                    .keys()
                    .map(|k| (k.clone(), self.snr(k)))
                    .collect(),
            },
            uncorrectable_threshold: self.uncorrectable_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveTable<L> {
    pub default_key: String,
    /// Limits applied to any key not listed in `bands`.
    pub default: L,
    pub bands: BTreeMap<String, L>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveThresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub downstream_power: EffectiveTable<PowerLimits>,
    pub upstream_power: EffectiveTable<PowerLimits>,
    pub snr: EffectiveTable<SnrLimits>,
    pub uncorrectable_threshold: f64,
}
