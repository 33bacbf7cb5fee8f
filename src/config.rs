// Copyright 2025 Qubership Monitoring Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Operator settings taken from the process environment.

use snafu::{ResultExt, Snafu};
use std::time::Duration;
use tracing::warn;

pub const RECONCILIATION_INTERVAL_ENV: &str = "RECONCILIATION_INTERVAL";
pub const PRIVILEGED_RIGHTS_ENV: &str = "PRIVILEGED_RIGHTS";
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";
pub const TICK_TIMEOUT_ENV: &str = "TICK_TIMEOUT";

const DEFAULT_RECONCILIATION_INTERVAL: &str = "120";
const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid {RECONCILIATION_INTERVAL_ENV} '{value}': {source}"))]
    ReconciliationInterval {
        value: String,
        source: std::num::ParseIntError,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Kept raw: it is parsed on every tick and a bad value fails that tick.
    pub reconciliation_interval: String,
    pub privileged: bool,
    pub watch_namespace: Option<String>,
    pub tick_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval: DEFAULT_RECONCILIATION_INTERVAL.to_owned(),
            privileged: true,
            watch_namespace: None,
            tick_timeout: DEFAULT_TICK_TIMEOUT,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let reconciliation_interval = lookup(RECONCILIATION_INTERVAL_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.reconciliation_interval);

        let privileged = match lookup(PRIVILEGED_RIGHTS_ENV) {
            None => defaults.privileged,
            Some(raw) => raw.trim().parse::<bool>().unwrap_or_else(|_| {
                warn!(value = %raw, "invalid {PRIVILEGED_RIGHTS_ENV}, assuming privileged");
                defaults.privileged
            }),
        };

        let watch_namespace = lookup(WATCH_NAMESPACE_ENV).filter(|v| !v.is_empty());

        let tick_timeout = match lookup(TICK_TIMEOUT_ENV) {
            None => defaults.tick_timeout,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(value = %raw, "invalid {TICK_TIMEOUT_ENV}, using default");
                    defaults.tick_timeout
                }
            },
        };

        Self {
            reconciliation_interval,
            privileged,
            watch_namespace,
            tick_timeout,
        }
    }

    pub fn reconciliation_interval(&self) -> Result<Duration, Error> {
        let secs = self
            .reconciliation_interval
            .trim()
            .parse::<u64>()
            .context(ReconciliationIntervalSnafu {
                value: self.reconciliation_interval.clone(),
            })?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> OperatorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg, OperatorConfig::default());
        assert_eq!(cfg.reconciliation_interval().unwrap(), Duration::from_secs(120));
        assert!(cfg.privileged);
        assert_eq!(cfg.tick_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_values_from_env() {
        let cfg = config(&[
            (RECONCILIATION_INTERVAL_ENV, "30"),
            (PRIVILEGED_RIGHTS_ENV, "false"),
            (WATCH_NAMESPACE_ENV, "monitoring"),
            (TICK_TIMEOUT_ENV, "60"),
        ]);
        assert_eq!(cfg.reconciliation_interval().unwrap(), Duration::from_secs(30));
        assert!(!cfg.privileged);
        assert_eq!(cfg.watch_namespace.as_deref(), Some("monitoring"));
        assert_eq!(cfg.tick_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[(PRIVILEGED_RIGHTS_ENV, "maybe"), (TICK_TIMEOUT_ENV, "0")]);
        assert!(cfg.privileged);
        assert_eq!(cfg.tick_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_bad_interval_is_reported_on_parse() {
        let cfg = config(&[(RECONCILIATION_INTERVAL_ENV, "2m")]);
        let err = cfg.reconciliation_interval().unwrap_err();
        assert!(err.to_string().starts_with("invalid RECONCILIATION_INTERVAL '2m'"));
    }
}
