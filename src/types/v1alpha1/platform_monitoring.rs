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

use crate::types;
use crate::types::error::NoNamespaceSnafu;
use crate::types::v1alpha1::exporters::{
    self, KubeStateMetrics, NodeExporter, Pushgateway,
};
use crate::types::v1alpha1::grafana::{self, Grafana};
use crate::types::v1alpha1::k8s::{self, Monitor};
use crate::types::v1alpha1::victoriametrics::{
    Victoriametrics, VmAgent, VmAlert, VmAlertManager, VmAuth, VmOperator, VmSingle, VmUser,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;

/// Name of the CR the standalone certificate refresh reads.
pub const DEFAULT_CR_NAME: &str = "platformmonitoring";

/// Keys of `kubernetesMonitors`.
pub mod monitors {
    pub const APISERVER: &str = "apiserverServiceMonitor";
    pub const KUBELET: &str = "kubeletServiceMonitor";
    pub const CORE_DNS: &str = "coreDnsServiceMonitor";
    pub const NGINX_INGRESS: &str = "nginxIngressPodMonitor";
    pub const ETCD: &str = "etcdServiceMonitor";
    pub const OPENSHIFT_APISERVER: &str = "openshiftApiserverServiceMonitor";
    pub const OPENSHIFT_APISERVER_OPERATOR: &str = "openshiftApiserverOperatorServiceMonitor";
    pub const OPENSHIFT_CLUSTER_VERSION_OPERATOR: &str =
        "openshiftClusterVersionOperatorServiceMonitor";
    pub const OPENSHIFT_STATEMETRICS: &str = "openshiftStatemetricsServiceMonitor";
    pub const OPENSHIFT_HAPROXY: &str = "openshiftHAProxyServiceMonitor";
}

/// Managed clouds hide the control plane, so these monitors have nothing to
/// scrape there.
const PUBLIC_CLOUD_DISABLED: [&str; 2] = [monitors::CORE_DNS, monitors::ETCD];
const PUBLIC_CLOUDS: [&str; 3] = ["aws", "azure", "google"];

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "monitoring.qubership.org",
    version = "v1alpha1",
    kind = "PlatformMonitoring",
    namespaced,
    status = "crate::types::v1alpha1::status::Status",
    shortname = "pm",
    plural = "platformmonitorings",
    singular = "platformmonitoring",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.conditions[?(@.reason==\"ReconcileCycleStatus\")].type"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMonitoringSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub victoriametrics: Option<Victoriametrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana: Option<Grafana>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_state_metrics: Option<KubeStateMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_exporter: Option<NodeExporter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushgateway: Option<Pushgateway>,

    /// Control plane monitors keyed by monitor name, e.g. `kubeletServiceMonitor`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubernetes_monitors: BTreeMap<String, Monitor>,

    /// One of `aws`, `azure`, `google` when running on a managed cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_cloud_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<k8s::ImagePullPolicy>,
}

impl PlatformMonitoring {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    /// a new owner reference for platform monitoring
    pub fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// `app.kubernetes.io/instance` value for an object name: `<name>-<namespace>`
    /// cut to a valid label length.
    pub fn instance_label(&self, object_name: &str) -> String {
        let namespace = ResourceExt::namespace(self).unwrap_or_default();
        let mut value = format!("{object_name}-{namespace}");
        value.truncate(63);
        value.trim_matches('-').to_owned()
    }

    pub fn image_pull_policy(&self) -> String {
        self.spec
            .image_pull_policy
            .clone()
            .unwrap_or_default()
            .to_string()
    }

    /// Fill empty images with the defaults shipped with the operator.
    ///
    /// Works on the in-memory copy of a tick only; the stored spec is never
    /// written back.
    pub fn fill_empty_with_defaults(&mut self) {
        fn fill(image: &mut String, default: &str) {
            if image.is_empty() {
                *image = default.to_owned();
            }
        }

        if let Some(grafana) = self.spec.grafana.as_mut() {
            fill(&mut grafana.image, grafana::DEFAULT_GRAFANA_IMAGE);
            fill(
                &mut grafana.operator.image,
                grafana::DEFAULT_GRAFANA_OPERATOR_IMAGE,
            );
            fill(
                &mut grafana.operator.init_container_image,
                grafana::DEFAULT_GRAFANA_PLUGINS_INIT_IMAGE,
            );
        }
        if let Some(ksm) = self.spec.kube_state_metrics.as_mut() {
            fill(&mut ksm.image, exporters::DEFAULT_KUBE_STATE_METRICS_IMAGE);
        }
        if let Some(exporter) = self.spec.node_exporter.as_mut() {
            fill(&mut exporter.image, exporters::DEFAULT_NODE_EXPORTER_IMAGE);
        }
        if let Some(pushgateway) = self.spec.pushgateway.as_mut() {
            fill(&mut pushgateway.image, exporters::DEFAULT_PUSHGATEWAY_IMAGE);
        }
    }

    pub fn is_public_cloud(&self) -> bool {
        self.spec
            .public_cloud_name
            .as_deref()
            .is_some_and(|cloud| PUBLIC_CLOUDS.contains(&cloud.to_lowercase().as_str()))
    }

    /// A control plane monitor after applying the public cloud overrides.
    pub fn kubernetes_monitor(&self, name: &str) -> Option<&Monitor> {
        if self.is_public_cloud() && PUBLIC_CLOUD_DISABLED.contains(&name) {
            return None;
        }
        self.spec
            .kubernetes_monitors
            .get(name)
            .filter(|m| m.is_install())
    }

    pub fn vm_operator(&self) -> Option<&VmOperator> {
        self.spec.victoriametrics.as_ref()?.vm_operator.as_ref()
    }

    pub fn vm_single(&self) -> Option<&VmSingle> {
        self.spec.victoriametrics.as_ref()?.vm_single.as_ref()
    }

    pub fn vm_agent(&self) -> Option<&VmAgent> {
        self.spec.victoriametrics.as_ref()?.vm_agent.as_ref()
    }

    pub fn vm_alert_manager(&self) -> Option<&VmAlertManager> {
        self.spec.victoriametrics.as_ref()?.vm_alert_manager.as_ref()
    }

    pub fn vm_alert(&self) -> Option<&VmAlert> {
        self.spec.victoriametrics.as_ref()?.vm_alert.as_ref()
    }

    pub fn vm_auth(&self) -> Option<&VmAuth> {
        self.spec.victoriametrics.as_ref()?.vm_auth.as_ref()
    }

    pub fn vm_user(&self) -> Option<&VmUser> {
        self.spec.victoriametrics.as_ref()?.vm_user.as_ref()
    }

    pub fn vm_single_installed(&self) -> bool {
        self.vm_single().is_some_and(VmSingle::is_install)
    }

    pub fn vm_auth_installed(&self) -> bool {
        self.vm_auth().is_some_and(VmAuth::is_install)
    }

    pub fn vm_alert_manager_installed(&self) -> bool {
        self.vm_alert_manager()
            .is_some_and(VmAlertManager::is_install)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::platform_monitoring;

    #[test]
    fn test_instance_label_is_truncated_and_trimmed() {
        let mut cr = platform_monitoring();
        cr.metadata.namespace = Some("monitoring".to_owned());
        assert_eq!(cr.instance_label("grafana"), "grafana-monitoring");

        // 62 chars + '-' lands exactly on the cut
        let long = "a".repeat(62);
        assert_eq!(cr.instance_label(&long), long);
    }

    #[test]
    fn test_defaults_only_touch_present_sections() {
        let mut cr = platform_monitoring();
        cr.spec.grafana = Some(Grafana::default());
        cr.spec.victoriametrics = Some(Victoriametrics {
            vm_single: Some(VmSingle::default()),
            ..Default::default()
        });

        cr.fill_empty_with_defaults();

        let grafana = cr.spec.grafana.as_ref().unwrap();
        assert_eq!(grafana.image, grafana::DEFAULT_GRAFANA_IMAGE);
        assert_eq!(grafana.operator.image, grafana::DEFAULT_GRAFANA_OPERATOR_IMAGE);
        assert!(cr.spec.kube_state_metrics.is_none());
        assert!(cr.vm_single().unwrap().image.is_empty());
        assert!(!cr.vm_single_installed());
    }

    #[test]
    fn test_public_cloud_suppresses_control_plane_monitors() {
        let mut cr = platform_monitoring();
        let enabled = Monitor {
            install: Some(true),
            ..Default::default()
        };
        cr.spec
            .kubernetes_monitors
            .insert(monitors::ETCD.to_owned(), enabled.clone());
        cr.spec
            .kubernetes_monitors
            .insert(monitors::KUBELET.to_owned(), enabled);
        assert!(cr.kubernetes_monitor(monitors::ETCD).is_some());

        cr.spec.public_cloud_name = Some("AWS".to_owned());
        assert!(cr.kubernetes_monitor(monitors::ETCD).is_none());
        assert!(cr.kubernetes_monitor(monitors::KUBELET).is_some());
    }

    #[test]
    fn test_disabled_monitor_is_absent() {
        let mut cr = platform_monitoring();
        cr.spec
            .kubernetes_monitors
            .insert(monitors::KUBELET.to_owned(), Monitor::default());
        assert!(cr.kubernetes_monitor(monitors::KUBELET).is_none());
    }
}
