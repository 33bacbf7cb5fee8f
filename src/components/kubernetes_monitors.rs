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

//! ServiceMonitors and PodMonitors for the cluster's own control plane.

use super::common;
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::{Desired, ObjectKey};
use crate::types::v1alpha1::k8s::Monitor;
use crate::types::v1alpha1::platform_monitoring::monitors;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

const COMPONENT: &str = "kubernetes-monitors";

const SA_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SA_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Service,
    Pod,
}

/// One control plane monitor: the CR key that enables it and the suffix
/// of the object it produces.
struct Target {
    key: &'static str,
    suffix: &'static str,
    kind: Kind,
}

const TARGETS: &[Target] = &[
    Target {
        key: monitors::APISERVER,
        suffix: "kube-apiserver-service-monitor",
        kind: Kind::Service,
    },
    Target {
        key: monitors::KUBELET,
        suffix: "kubelet-service-monitor",
        kind: Kind::Service,
    },
    Target {
        key: monitors::CORE_DNS,
        suffix: "core-dns-service-monitor",
        kind: Kind::Service,
    },
    Target {
        key: monitors::NGINX_INGRESS,
        suffix: "nginx-ingress-pod-monitor",
        kind: Kind::Pod,
    },
    Target {
        key: monitors::OPENSHIFT_APISERVER,
        suffix: "openshift-apiserver-service-monitor",
        kind: Kind::Service,
    },
    Target {
        key: monitors::OPENSHIFT_APISERVER_OPERATOR,
        suffix: "openshift-apiserver-operator-service-monitor",
        kind: Kind::Service,
    },
    Target {
        key: monitors::OPENSHIFT_CLUSTER_VERSION_OPERATOR,
        suffix: "openshift-cluster-version-operator-service-monitor",
        kind: Kind::Service,
    },
    Target {
        key: monitors::OPENSHIFT_STATEMETRICS,
        suffix: "openshift-statemetrics-service-monitor",
        kind: Kind::Service,
    },
    Target {
        key: monitors::OPENSHIFT_HAPROXY,
        suffix: "openshift-haproxy-service-monitor",
        kind: Kind::Service,
    },
];

pub struct KubernetesMonitors;

impl KubernetesMonitors {
    fn key(ctx: &ComponentContext<'_>, target: &Target) -> ObjectKey {
        let name = ctx.prefixed(target.suffix);
        match target.kind {
            Kind::Service => common::service_monitor_key(ctx, &name),
            Kind::Pod => common::pod_monitor_key(ctx, &name),
        }
    }

    /// Whether the platform has the monitored endpoint at all.
    fn applicable(ctx: &ComponentContext<'_>, key: &str) -> bool {
        let caps = ctx.caps;
        match key {
            monitors::CORE_DNS => !caps.is_openshift_v3(),
            monitors::NGINX_INGRESS => !caps.has_route_api(),
            monitors::OPENSHIFT_APISERVER
            | monitors::OPENSHIFT_APISERVER_OPERATOR
            | monitors::OPENSHIFT_CLUSTER_VERSION_OPERATOR
            | monitors::OPENSHIFT_STATEMETRICS
            | monitors::OPENSHIFT_HAPROXY => caps.is_openshift_v4(),
            _ => true,
        }
    }

    fn desired(ctx: &ComponentContext<'_>, target: &Target, monitor: &Monitor) -> Desired {
        let name = ctx.prefixed(target.suffix);
        let labels = ctx.labels(&name, COMPONENT, None);
        let https = |port: &str| {
            json!({
                "port": port,
                "scheme": "https",
                "bearerTokenFile": SA_TOKEN,
                "tlsConfig": {"insecureSkipVerify": true},
            })
        };
        let by_label = |key: &str, value: &str| json!({"matchLabels": {key: value}});

        let service = |endpoints: Vec<Value>, selector: Value, namespaces: &[&str]| {
            common::service_monitor(
                ctx,
                &name,
                labels.clone(),
                monitor,
                endpoints,
                selector,
                Some(namespaces),
            )
        };

        match target.key {
            monitors::APISERVER => service(
                vec![json!({
                    "port": "https",
                    "scheme": "https",
                    "bearerTokenFile": SA_TOKEN,
                    "tlsConfig": {"caFile": SA_CA, "serverName": "kubernetes"},
                })],
                json!({"matchLabels": {"component": "apiserver", "provider": "kubernetes"}}),
                &["default"],
            ),
            monitors::KUBELET => {
                let mut cadvisor = https("https-metrics");
                cadvisor["path"] = json!("/metrics/cadvisor");
                cadvisor["honorLabels"] = json!(true);
                let mut kubelet = https("https-metrics");
                kubelet["honorLabels"] = json!(true);
                service(
                    vec![kubelet, cadvisor],
                    by_label("k8s-app", "kubelet"),
                    &["kube-system"],
                )
            }
            monitors::CORE_DNS if ctx.caps.is_openshift_v4() => service(
                vec![https("metrics")],
                by_label("dns.operator.openshift.io/daemonset-dns", "default"),
                &["openshift-dns"],
            ),
            monitors::CORE_DNS => service(
                vec![json!({"port": "metrics"})],
                by_label("k8s-app", "kube-dns"),
                &["kube-system"],
            ),
            monitors::NGINX_INGRESS => common::pod_monitor(
                ctx,
                &name,
                labels.clone(),
                monitor,
                vec![json!({"port": "metrics"})],
                by_label("app.kubernetes.io/name", "ingress-nginx"),
                json!({"any": true}),
            ),
            monitors::OPENSHIFT_APISERVER => service(
                vec![https("https")],
                by_label("prometheus", "openshift-apiserver"),
                &["openshift-apiserver"],
            ),
            monitors::OPENSHIFT_APISERVER_OPERATOR => service(
                vec![https("https")],
                by_label("app", "openshift-apiserver-operator"),
                &["openshift-apiserver-operator"],
            ),
            monitors::OPENSHIFT_CLUSTER_VERSION_OPERATOR => service(
                vec![https("metrics")],
                by_label("k8s-app", "cluster-version-operator"),
                &["openshift-cluster-version"],
            ),
            monitors::OPENSHIFT_STATEMETRICS => service(
                vec![https("https-main"), https("https-self")],
                by_label("k8s-app", "openshift-state-metrics"),
                &["openshift-monitoring"],
            ),
            _ => service(
                vec![https("metrics")],
                by_label("ingresscontroller.operator.openshift.io/owning-ingresscontroller", "default"),
                &["openshift-ingress"],
            ),
        }
    }
}

#[async_trait]
impl Component for KubernetesMonitors {
    fn name(&self) -> &'static str {
        COMPONENT
    }

    fn display_name(&self) -> &'static str {
        "Kubernetes monitors"
    }

    fn reason(&self) -> Option<&'static str> {
        None
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        if ctx.cr.spec.kubernetes_monitors.is_empty() {
            ctx.remove_all(TARGETS.iter().map(|t| Self::key(ctx, t)).collect())
                .await;
            return Ok(Outcome::default());
        }

        for target in TARGETS {
            let wanted = ctx
                .cr
                .kubernetes_monitor(target.key)
                .filter(|_| Self::applicable(ctx, target.key));
            match wanted {
                Some(monitor) => {
                    if let Err(error) = ctx.sync.ensure(Self::desired(ctx, target, monitor)).await {
                        warn!(monitor = target.key, %error, "failed to reconcile kubernetes monitor");
                    }
                }
                None => ctx.remove_all(vec![Self::key(ctx, target)]).await,
            }
        }
        Ok(Outcome::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::components::common::api;
    use crate::tests::{Harness, openshift_v3, openshift_v4, platform_monitoring, vanilla};

    fn enabled() -> Monitor {
        Monitor {
            install: Some(true),
            interval: Some("15s".to_owned()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_vanilla_cluster_gets_generic_monitors_only() {
        let mut cr = platform_monitoring();
        for key in [
            monitors::KUBELET,
            monitors::NGINX_INGRESS,
            monitors::OPENSHIFT_APISERVER,
        ] {
            cr.spec.kubernetes_monitors.insert(key.to_owned(), enabled());
        }
        let harness = Harness::new(cr, vanilla("30"));

        harness.run(&KubernetesMonitors).await.unwrap();

        let kubelet = harness
            .custom(api::service_monitor(), "monitoring-kubelet-service-monitor")
            .unwrap();
        assert_eq!(kubelet.data["spec"]["endpoints"][0]["interval"], "15s");
        assert_eq!(
            kubelet.data["spec"]["namespaceSelector"]["matchNames"][0],
            "kube-system"
        );
        assert!(harness
            .custom(api::pod_monitor(), "monitoring-nginx-ingress-pod-monitor")
            .is_some());
        assert!(harness
            .custom(
                api::service_monitor(),
                "monitoring-openshift-apiserver-service-monitor"
            )
            .is_none());
    }

    #[tokio::test]
    async fn test_openshift_gating() {
        let mut cr = platform_monitoring();
        for key in [
            monitors::CORE_DNS,
            monitors::NGINX_INGRESS,
            monitors::OPENSHIFT_APISERVER,
        ] {
            cr.spec.kubernetes_monitors.insert(key.to_owned(), enabled());
        }

        let v4 = Harness::new(cr.clone(), openshift_v4());
        v4.run(&KubernetesMonitors).await.unwrap();
        let dns = v4
            .custom(api::service_monitor(), "monitoring-core-dns-service-monitor")
            .unwrap();
        assert_eq!(
            dns.data["spec"]["namespaceSelector"]["matchNames"][0],
            "openshift-dns"
        );
        assert!(v4
            .custom(api::pod_monitor(), "monitoring-nginx-ingress-pod-monitor")
            .is_none());
        assert!(v4
            .custom(
                api::service_monitor(),
                "monitoring-openshift-apiserver-service-monitor"
            )
            .is_some());

        let v3 = Harness::new(cr, openshift_v3());
        v3.run(&KubernetesMonitors).await.unwrap();
        assert!(v3
            .custom(api::service_monitor(), "monitoring-core-dns-service-monitor")
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_map_removes_everything() {
        let mut cr = platform_monitoring();
        cr.spec
            .kubernetes_monitors
            .insert(monitors::KUBELET.to_owned(), enabled());
        let harness = Harness::new(cr, vanilla("30"));
        harness.run(&KubernetesMonitors).await.unwrap();
        assert!(harness
            .custom(api::service_monitor(), "monitoring-kubelet-service-monitor")
            .is_some());

        harness.update(|cr| cr.spec.kubernetes_monitors.clear());
        harness.run(&KubernetesMonitors).await.unwrap();
        assert!(harness
            .custom(api::service_monitor(), "monitoring-kubelet-service-monitor")
            .is_none());
    }

    #[tokio::test]
    async fn test_public_cloud_removes_core_dns() {
        let mut cr = platform_monitoring();
        cr.spec
            .kubernetes_monitors
            .insert(monitors::CORE_DNS.to_owned(), enabled());
        let harness = Harness::new(cr, vanilla("30"));
        harness.run(&KubernetesMonitors).await.unwrap();
        assert!(harness
            .custom(api::service_monitor(), "monitoring-core-dns-service-monitor")
            .is_some());

        harness.update(|cr| cr.spec.public_cloud_name = Some("azure".to_owned()));
        harness.run(&KubernetesMonitors).await.unwrap();
        assert!(harness
            .custom(api::service_monitor(), "monitoring-core-dns-service-monitor")
            .is_none());
    }
}
