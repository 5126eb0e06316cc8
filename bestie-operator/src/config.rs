//! Operator configuration from flags and environment.

use crate::controller::ReconcileSettings;
use crate::error::{OperatorError, OperatorResult};
use crate::telemetry::{LogFormat, default_filter};
use clap::Parser;
use std::time::Duration;

/// Bestie operator
#[derive(Debug, Clone, Parser)]
#[command(name = "bestie-operator")]
#[command(author, version, about, long_about = None)]
pub struct OperatorConfig {
    /// Only watch Besties in this namespace (default: all namespaces)
    #[arg(long, env = "BESTIE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Maximum number of Besties reconciled at once
    #[arg(long, env = "BESTIE_CONCURRENCY", default_value_t = 2)]
    pub concurrency: u16,

    /// Seconds to wait before re-checking an unready Deployment
    #[arg(long, env = "BESTIE_READINESS_DELAY_SECS", default_value_t = 15)]
    pub readiness_delay_secs: u64,

    /// Seconds to wait before a requested requeue
    #[arg(long, env = "BESTIE_REQUEUE_INTERVAL_SECS", default_value_t = 5)]
    pub requeue_interval_secs: u64,

    /// Log format: json, pretty or compact
    #[arg(long, env = "BESTIE_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the Bestie CRD as YAML and exit
    #[arg(long)]
    pub generate_crds: bool,
}

impl OperatorConfig {
    /// Check values clap cannot.
    pub fn validate(&self) -> OperatorResult<()> {
        if self.concurrency == 0 {
            return Err(OperatorError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.readiness_delay_secs == 0 {
            return Err(OperatorError::InvalidConfig(
                "readiness delay must be at least one second".into(),
            ));
        }
        if self.requeue_interval_secs == 0 {
            return Err(OperatorError::InvalidConfig(
                "requeue interval must be at least one second".into(),
            ));
        }
        if let Some(ns) = &self.namespace {
            if ns.trim().is_empty() {
                return Err(OperatorError::InvalidConfig(
                    "namespace must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Controller timing derived from this configuration.
    pub fn reconcile_settings(&self) -> OperatorResult<ReconcileSettings> {
        self.validate()?;
        Ok(ReconcileSettings {
            readiness_delay: Duration::from_secs(self.readiness_delay_secs),
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
        })
    }

    /// Log filter used when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> String {
        default_filter(self.verbose)
    }
}
