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

//! Building blocks shared by several component sections of the resource

use crate::types::error::{EmptyIngressHostSnafu, Error};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

/// Image pull policy for the workloads the operator renders itself.
///
/// https://kubernetes.io/docs/concepts/containers/images/#image-pull-policy
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, Display, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum ImagePullPolicy {
    #[strum(to_string = "Always")]
    Always,

    #[strum(to_string = "Never")]
    Never,

    #[strum(to_string = "IfNotPresent")]
    #[default]
    IfNotPresent,
}

/// Ingress exposure of a component UI or API.
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Ingress {
    /// An explicit `install: false` always wins. Without `install` the ingress
    /// exists only when a host is given.
    pub fn is_install(&self) -> bool {
        self.install.unwrap_or(!self.host.is_empty())
    }

    pub fn host(&self, component: &str) -> Result<&str, Error> {
        if self.host.is_empty() {
            return EmptyIngressHostSnafu { component }.fail();
        }
        Ok(&self.host)
    }
}

/// Toggle and scrape settings of a ServiceMonitor or PodMonitor.
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Monitor {
    pub fn is_install(&self) -> bool {
        self.install.unwrap_or(false)
    }
}

/// Returns true when an optional monitor section asks to be installed.
pub fn monitor_enabled(monitor: Option<&Monitor>) -> bool {
    monitor.is_some_and(Monitor::is_install)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_install_follows_host_when_unset() {
        let mut ingress = Ingress::default();
        assert!(!ingress.is_install());

        ingress.host = "grafana.example.com".to_owned();
        assert!(ingress.is_install());

        ingress.install = Some(false);
        assert!(!ingress.is_install());
    }

    #[test]
    fn test_explicit_ingress_without_host_is_an_error() {
        let ingress = Ingress {
            install: Some(true),
            ..Default::default()
        };
        assert!(ingress.is_install());

        let err = ingress.host("grafana").unwrap_err();
        assert_eq!(err.to_string(), "host for grafana ingress can not be empty");
    }

    #[test]
    fn test_monitor_defaults_to_not_installed() {
        assert!(!Monitor::default().is_install());
        assert!(!monitor_enabled(None));
        assert!(monitor_enabled(Some(&Monitor {
            install: Some(true),
            ..Default::default()
        })));
    }

    #[test]
    fn test_image_pull_policy_display() {
        assert_eq!(ImagePullPolicy::default().to_string(), "IfNotPresent");
        assert_eq!(ImagePullPolicy::Always.to_string(), "Always");
    }
}
