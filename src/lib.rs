//! DOCSIS channel health classification.
//!
//! Turns raw per-channel power/SNR/error readings from a cable modem into
//! per-channel verdicts and one connection-wide health summary, using
//! modulation- and DOCSIS-version-aware thresholds.
//!
//! ```
//! use docsis_health::{analyze, ConnectionHealth, Snapshot, Thresholds};
//!
//! let thresholds = Thresholds::default();
//! let snapshot = Snapshot::from_json(r#"{
//!     "channelDs": {"docsis30": [
//!         {"channelID": 1, "powerLevel": "3.5", "modulation": "256QAM", "mse": "-35.0"}
//!     ]},
//!     "channelUs": {"docsis30": [
//!         {"channelID": 1, "powerLevel": "44.0", "modulation": "64QAM"}
//!     ]}
//! }"#).unwrap();
//!
//! let analysis = analyze(&snapshot, &thresholds);
//! assert_eq!(analysis.summary.health, ConnectionHealth::Good);
//! ```

pub mod analyzer;
pub mod channel;
pub mod classify;
pub mod error;
pub mod thresholds;

pub use analyzer::{
    analyze, Analysis, ConnectionHealth, DownstreamChannel, HealthIssue, Summary, UpstreamChannel,
};
pub use channel::{ChannelGroup, DocsisVersion, DownstreamReading, Snapshot, UpstreamReading};
pub use classify::{
    classify_downstream, classify_upstream, ChannelHealth, ChannelIssue, ChannelVerdict, Metric,
    Severity,
};
pub use error::{SnapshotError, ThresholdError};
pub use thresholds::{PowerLimits, SnrLimits, Thresholds};
