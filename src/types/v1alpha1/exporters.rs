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

//! Metric exporters deployed next to the collectors.

use crate::types::v1alpha1::k8s::{Ingress, Monitor};
use k8s_openapi::api::core::v1 as corev1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_KUBE_STATE_METRICS_IMAGE: &str =
    "registry.k8s.io/kube-state-metrics/kube-state-metrics:v2.12.0";
pub const DEFAULT_NODE_EXPORTER_IMAGE: &str = "quay.io/prometheus/node-exporter:v1.8.1";
pub const DEFAULT_PUSHGATEWAY_IMAGE: &str = "quay.io/prometheus/pushgateway:v1.8.0";

pub const DEFAULT_NODE_EXPORTER_PORT: i32 = 9900;

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeStateMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<Monitor>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<corev1::Toleration>,
}

impl KubeStateMetrics {
    pub fn is_install(&self) -> bool {
        self.install.unwrap_or(true)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeExporter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<Monitor>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<corev1::Toleration>,
}

impl NodeExporter {
    pub fn is_install(&self) -> bool {
        self.install.unwrap_or(true)
    }

    pub fn port(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_NODE_EXPORTER_PORT)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pushgateway {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<Monitor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

impl Pushgateway {
    pub fn is_install(&self) -> bool {
        self.install.unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_install_defaults() {
        assert!(KubeStateMetrics::default().is_install());
        assert!(NodeExporter::default().is_install());
        assert!(!Pushgateway::default().is_install());
    }

    #[test]
    fn test_node_exporter_port() {
        assert_eq!(NodeExporter::default().port(), 9900);
        let exporter = NodeExporter {
            port: Some(9100),
            ..Default::default()
        };
        assert_eq!(exporter.port(), 9100);
    }
}
