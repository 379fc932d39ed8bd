//! Connection-wide health analysis.
//!
//! Runs the per-channel classifier over every reading of a snapshot, sorts
//! the channels, computes summary statistics and rolls the per-channel
//! issues up into one connection verdict.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::channel::{DocsisVersion, Snapshot};
use crate::classify::{
    classify_downstream, classify_upstream, ChannelHealth, ChannelIssue, ChannelVerdict, Metric,
    Severity,
};
use crate::thresholds::Thresholds;

/// Overall connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionHealth {
    Good,
    Marginal,
    Poor,
}

impl ConnectionHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionHealth::Good => "good",
            ConnectionHealth::Marginal => "marginal",
            ConnectionHealth::Poor => "poor",
        }
    }
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "good" => Ok(ConnectionHealth::Good),
            "marginal" => Ok(ConnectionHealth::Marginal),
            "poor" => Ok(ConnectionHealth::Poor),
            other => Err(format!("unknown health '{}'", other)),
        }
    }
}

/// Machine-readable connection issue codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssue {
    DsPowerCritical,
    DsPowerWarn,
    UsPowerCritical,
    UsPowerWarn,
    SnrCritical,
    SnrWarn,
    UncorrErrorsHigh,
}

impl HealthIssue {
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            HealthIssue::DsPowerCritical | HealthIssue::UsPowerCritical | HealthIssue::SnrCritical
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownstreamChannel {
    pub channel_id: u32,
    pub frequency: String,
    pub power: f64,
    pub modulation: String,
    pub snr: Option<f64>,
    pub correctable_errors: u64,
    pub uncorrectable_errors: u64,
    pub docsis_version: DocsisVersion,
    pub health: ChannelHealth,
    pub health_detail: String,
    pub issues: Vec<ChannelIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamChannel {
    pub channel_id: u32,
    pub frequency: String,
    pub power: f64,
    pub modulation: String,
    pub multiplex: String,
    pub docsis_version: DocsisVersion,
    pub health: ChannelHealth,
    pub health_detail: String,
    pub issues: Vec<ChannelIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub ds_total: usize,
    pub us_total: usize,
    pub ds_power_min: f64,
    pub ds_power_max: f64,
    pub ds_power_avg: f64,
    pub us_power_min: f64,
    pub us_power_max: f64,
    pub us_power_avg: f64,
    pub ds_snr_min: f64,
    pub ds_snr_avg: f64,
    pub ds_correctable_errors: u64,
    pub ds_uncorrectable_errors: u64,
    pub health: ConnectionHealth,
    pub health_issues: Vec<HealthIssue>,
}

/// Result of one analysis. Channels are sorted by id within each direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub summary: Summary,
    pub ds_channels: Vec<DownstreamChannel>,
    pub us_channels: Vec<UpstreamChannel>,
}

/// Round to one decimal, half away from zero (0.25 gives 0.3, not the
/// round-half-even 0.2). Values too large to scale are returned unchanged.
fn round1(value: f64) -> f64 {
    let scaled = value * 10.0;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / 10.0
}

/// Arithmetic mean that stays finite for finite inputs near `f64::MAX`.
fn mean(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    if sum.is_finite() {
        sum / n
    } else {
        values.iter().map(|v| v / n).sum()
    }
}

/// Min, max and mean of a series, each rounded to one decimal.
/// An empty series yields zeros.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Stats {
    min: f64,
    max: f64,
    avg: f64,
}

impl Stats {
    fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = mean(values);
        Self {
            min: round1(min),
            max: round1(max),
            avg: round1(avg),
        }
    }
}

/// Highest severity of `metric` across a set of channel verdicts.
fn worst<'a>(
    verdicts: impl Iterator<Item = &'a [ChannelIssue]>,
    metric: Metric,
) -> Option<Severity> {
    verdicts
        .flat_map(|issues| issues.iter())
        .filter(|issue| issue.metric == metric)
        .map(|issue| issue.severity)
        .max()
}

fn connection_health(issues: &[HealthIssue]) -> ConnectionHealth {
    if issues.is_empty() {
        ConnectionHealth::Good
    } else if issues.iter().any(HealthIssue::is_critical) {
        ConnectionHealth::Poor
    } else {
        ConnectionHealth::Marginal
    }
}

/// A classified downstream channel, keeping the unrounded readings for
/// statistics.
struct ClassifiedDownstream {
    record: DownstreamChannel,
    power: f64,
    snr: Option<f64>,
}

/// Analyze one snapshot against the given thresholds.
///
/// Never fails: missing or malformed readings degrade to zero values and
/// an empty snapshot is a healthy connection with no channels.
pub fn analyze(snapshot: &Snapshot, thresholds: &Thresholds) -> Analysis {
    let mut downstream: Vec<ClassifiedDownstream> = snapshot
        .downstream
        .iter()
        .map(|(version, reading)| {
            let verdict = classify_downstream(reading, version, thresholds);
            log_verdict("DS", reading.channel_id, version, &verdict);
            let power = reading.power();
            let snr = reading.snr(version);
            ClassifiedDownstream {
                record: DownstreamChannel {
                    channel_id: reading.channel_id,
                    frequency: reading.frequency.clone(),
                    power: round1(power),
                    modulation: reading.modulation().to_string(),
                    snr: snr.map(round1),
                    correctable_errors: reading.correctable_errors,
                    uncorrectable_errors: reading.uncorrectable_errors,
                    docsis_version: version,
                    health: verdict.health,
                    health_detail: verdict.detail(),
                    issues: verdict.issues,
                },
                power,
                snr,
            }
        })
        .collect();
    // Stable: equal ids keep 3.0-before-3.1 order.
    downstream.sort_by_key(|c| c.record.channel_id);

    let mut upstream: Vec<(UpstreamChannel, f64)> = snapshot
        .upstream
        .iter()
        .map(|(version, reading)| {
            let verdict = classify_upstream(reading, version, thresholds);
            log_verdict("US", reading.channel_id, version, &verdict);
            let power = reading.power();
            let record = UpstreamChannel {
                channel_id: reading.channel_id,
                frequency: reading.frequency.clone(),
                power: round1(power),
                modulation: reading.modulation().to_string(),
                multiplex: reading.multiplex.clone(),
                docsis_version: version,
                health: verdict.health,
                health_detail: verdict.detail(),
                issues: verdict.issues,
            };
            (record, power)
        })
        .collect();
    upstream.sort_by_key(|(record, _)| record.channel_id);

    let ds_power: Vec<f64> = downstream.iter().map(|c| c.power).collect();
    let ds_snr: Vec<f64> = downstream.iter().filter_map(|c| c.snr).collect();
    let us_power: Vec<f64> = upstream.iter().map(|(_, power)| *power).collect();

    let ds_stats = Stats::of(&ds_power);
    let us_stats = Stats::of(&us_power);
    let snr_stats = Stats::of(&ds_snr);

    let ds_correctable_errors: u64 = downstream
        .iter()
        .map(|c| c.record.correctable_errors)
        .fold(0, u64::saturating_add);
    let ds_uncorrectable_errors: u64 = downstream
        .iter()
        .map(|c| c.record.uncorrectable_errors)
        .fold(0, u64::saturating_add);

    let ds_channels: Vec<DownstreamChannel> = downstream.into_iter().map(|c| c.record).collect();
    let us_channels: Vec<UpstreamChannel> = upstream.into_iter().map(|(r, _)| r).collect();

    let mut health_issues = Vec::new();

    match worst(ds_channels.iter().map(|c| c.issues.as_slice()), Metric::Power) {
        Some(Severity::Critical) => health_issues.push(HealthIssue::DsPowerCritical),
        Some(Severity::Warning) => health_issues.push(HealthIssue::DsPowerWarn),
        None => {}
    }
    match worst(us_channels.iter().map(|c| c.issues.as_slice()), Metric::Power) {
        Some(Severity::Critical) => health_issues.push(HealthIssue::UsPowerCritical),
        Some(Severity::Warning) => health_issues.push(HealthIssue::UsPowerWarn),
        None => {}
    }
    match worst(ds_channels.iter().map(|c| c.issues.as_slice()), Metric::Snr) {
        Some(Severity::Critical) => health_issues.push(HealthIssue::SnrCritical),
        Some(Severity::Warning) => health_issues.push(HealthIssue::SnrWarn),
        None => {}
    }
    if thresholds.uncorrectable_exceeded(ds_uncorrectable_errors) {
        health_issues.push(HealthIssue::UncorrErrorsHigh);
    }

    let health = connection_health(&health_issues);

    info!(
        "Analysis: DS={} US={} Health={}",
        ds_channels.len(),
        us_channels.len(),
        health
    );

    Analysis {
        summary: Summary {
            ds_total: ds_channels.len(),
            us_total: us_channels.len(),
            ds_power_min: ds_stats.min,
            ds_power_max: ds_stats.max,
            ds_power_avg: ds_stats.avg,
            us_power_min: us_stats.min,
            us_power_max: us_stats.max,
            us_power_avg: us_stats.avg,
            ds_snr_min: snr_stats.min,
            ds_snr_avg: snr_stats.avg,
            ds_correctable_errors,
            ds_uncorrectable_errors,
            health,
            health_issues,
        },
        ds_channels,
        us_channels,
    }
}

fn log_verdict(direction: &str, channel_id: u32, version: DocsisVersion, verdict: &ChannelVerdict) {
    if verdict.health != ChannelHealth::Good {
        debug!(
            "{} channel {} (DOCSIS {}): {} ({})",
            direction,
            channel_id,
            version,
            verdict.health,
            verdict.detail()
        );
    }
}
