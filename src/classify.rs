use serde::{Serialize, Serializer};
use std::fmt;

use crate::channel::{DocsisVersion, DownstreamReading, UpstreamReading};
use crate::thresholds::{normalize_modulation, PowerLimits, SnrLimits, Thresholds};

/// Per-channel health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelHealth {
    Good,
    Warning,
    Critical,
}

impl fmt::Display for ChannelHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelHealth::Good => write!(f, "good"),
            ChannelHealth::Warning => write!(f, "warning"),
            ChannelHealth::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Power,
    Snr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Critical,
}

/// A single out-of-band measurement on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelIssue {
    pub metric: Metric,
    pub severity: Severity,
}

impl ChannelIssue {
    pub fn new(metric: Metric, severity: Severity) -> Self {
        Self { metric, severity }
    }
}

impl fmt::Display for ChannelIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metric = match self.metric {
            Metric::Power => "power",
            Metric::Snr => "snr",
        };
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{} {}", metric, severity)
    }
}

impl Serialize for ChannelIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of classifying one channel. Issues are ordered power first,
/// then SNR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelVerdict {
    pub health: ChannelHealth,
    pub issues: Vec<ChannelIssue>,
}

impl ChannelVerdict {
    fn from_issues(issues: Vec<ChannelIssue>) -> Self {
        let health = if issues.is_empty() {
            ChannelHealth::Good
        } else if issues.iter().any(|i| i.severity == Severity::Critical) {
            ChannelHealth::Critical
        } else {
            ChannelHealth::Warning
        };
        Self { health, issues }
    }

    /// Issues joined with `" + "`, empty when the channel is good.
    pub fn detail(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" + ")
    }

    pub fn has(&self, metric: Metric, severity: Severity) -> bool {
        self.issues.contains(&ChannelIssue::new(metric, severity))
    }
}

/// Critical bounds are checked first; a reading outside both bands is
/// reported only as critical. Bounds themselves are in band.
fn classify_power(power: f64, limits: &PowerLimits) -> Option<Severity> {
    if power < limits.crit_min || power > limits.crit_max {
        Some(Severity::Critical)
    } else if power < limits.good_min || power > limits.good_max {
        Some(Severity::Warning)
    } else {
        None
    }
}

fn classify_snr(snr: f64, limits: &SnrLimits) -> Option<Severity> {
    if snr < limits.crit_min {
        Some(Severity::Critical)
    } else if snr < limits.good_min {
        Some(Severity::Warning)
    } else {
        None
    }
}

/// Classify a downstream channel by power and, when the modem reported an
/// MSE/MER value, by SNR. Both are keyed by the channel's modulation.
pub fn classify_downstream(
    reading: &DownstreamReading,
    version: DocsisVersion,
    thresholds: &Thresholds,
) -> ChannelVerdict {
    let modulation = normalize_modulation(reading.modulation());
    let mut issues = Vec::new();

    let power_limits = thresholds.downstream_power(&modulation);
    if let Some(severity) = classify_power(reading.power(), &power_limits) {
        issues.push(ChannelIssue::new(Metric::Power, severity));
    }

    if let Some(snr) = reading.snr(version) {
        let snr_limits = thresholds.snr(&modulation);
        if let Some(severity) = classify_snr(snr, &snr_limits) {
            issues.push(ChannelIssue::new(Metric::Snr, severity));
        }
    }

    ChannelVerdict::from_issues(issues)
}

/// Classify an upstream channel by power, keyed by DOCSIS version.
pub fn classify_upstream(
    reading: &UpstreamReading,
    version: DocsisVersion,
    thresholds: &Thresholds,
) -> ChannelVerdict {
    let mut issues = Vec::new();

    let power_limits = thresholds.upstream_power(Some(version.as_str()));
    if let Some(severity) = classify_power(reading.power(), &power_limits) {
        issues.push(ChannelIssue::new(Metric::Power, severity));
    }

    ChannelVerdict::from_issues(issues)
}
