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

use super::common::{self, object_meta, rule};
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::{Desired, ObjectKey, fields};
use crate::types::v1alpha1::exporters::KubeStateMetrics as Spec;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::rbac::v1 as rbacv1;
use serde_json::json;
use tracing::info;

const NAME: &str = "kube-state-metrics";
const COMPONENT: &str = "kube-state-metrics";
const METRICS_PORT: i32 = 8080;
const TELEMETRY_PORT: i32 = 8081;

pub struct KubeStateMetrics;

fn cluster_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed(NAME)
}

fn service_monitor_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed("kube-state-metrics-service-monitor")
}

fn keys(ctx: &ComponentContext<'_>) -> Vec<ObjectKey> {
    let ns = Some(ctx.namespace.as_str());
    let cluster = cluster_name(ctx);
    vec![
        common::service_monitor_key(ctx, &service_monitor_name(ctx)),
        common::key::<corev1::Service>(ns, NAME),
        common::key::<appsv1::Deployment>(ns, NAME),
        common::key::<rbacv1::ClusterRoleBinding>(None, &cluster),
        common::key::<rbacv1::ClusterRole>(None, &cluster),
        common::key::<corev1::ServiceAccount>(ns, NAME),
    ]
}

fn rules() -> Vec<rbacv1::PolicyRule> {
    let read = &["list", "watch"];
    vec![
        rule(
            &[""],
            &[
                "configmaps",
                "secrets",
                "nodes",
                "pods",
                "services",
                "serviceaccounts",
                "resourcequotas",
                "replicationcontrollers",
                "limitranges",
                "persistentvolumeclaims",
                "persistentvolumes",
                "namespaces",
                "endpoints",
            ],
            read,
        ),
        rule(
            &["apps"],
            &["statefulsets", "daemonsets", "deployments", "replicasets"],
            read,
        ),
        rule(&["batch"], &["cronjobs", "jobs"], read),
        rule(&["autoscaling"], &["horizontalpodautoscalers"], read),
        rule(&["policy"], &["poddisruptionbudgets"], read),
        rule(&["networking.k8s.io"], &["networkpolicies", "ingresses"], read),
        rule(&["storage.k8s.io"], &["storageclasses", "volumeattachments"], read),
        rule(
            &["certificates.k8s.io"],
            &["certificatesigningrequests"],
            read,
        ),
        rule(&["coordination.k8s.io"], &["leases"], read),
    ]
}

fn deployment(ctx: &ComponentContext<'_>, spec: &Spec) -> Result<Desired, Error> {
    let labels = ctx.labels(NAME, COMPONENT, Some(&spec.image));
    let deployment = appsv1::Deployment {
        metadata: object_meta(NAME, Some(&ctx.namespace), labels.clone()),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(1),
            selector: common::label_selector(NAME),
            template: corev1::PodTemplateSpec {
                metadata: common::pod_meta(&labels),
                spec: Some(corev1::PodSpec {
                    service_account_name: Some(NAME.to_owned()),
                    node_selector: (!spec.node_selector.is_empty())
                        .then(|| spec.node_selector.clone()),
                    tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
                    containers: vec![corev1::Container {
                        name: NAME.to_owned(),
                        image: Some(spec.image.clone()),
                        image_pull_policy: Some(ctx.cr.image_pull_policy()),
                        args: Some(vec![
                            format!("--port={METRICS_PORT}"),
                            format!("--telemetry-port={TELEMETRY_PORT}"),
                        ]),
                        ports: Some(common::container_ports(&[
                            ("http-metrics", METRICS_PORT),
                            ("telemetry", TELEMETRY_PORT),
                        ])),
                        resources: spec.resources.clone(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(Desired::typed(&deployment, fields::WORKLOAD)?)
}

#[async_trait]
impl Component for KubeStateMetrics {
    fn name(&self) -> &'static str {
        "kube-state-metrics"
    }

    fn display_name(&self) -> &'static str {
        "Kube state metrics"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileKubeStateMetricsStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let spec = match ctx.cr.spec.kube_state_metrics.as_ref() {
            Some(spec) if spec.paused => {
                info!("kube-state-metrics is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                ctx.remove_all(keys(ctx)).await;
                return Ok(Outcome::default());
            }
        };

        let labels = ctx.labels(NAME, COMPONENT, Some(&spec.image));
        let cluster = cluster_name(ctx);
        ctx.apply_all(vec![
            common::service_account(ctx, NAME, &labels)?,
            common::cluster_role(&cluster, &labels, rules())?,
            common::cluster_role_binding(ctx, &cluster, &labels, NAME)?,
            deployment(ctx, spec)?,
            common::service(
                ctx,
                NAME,
                &labels,
                vec![("http-metrics", METRICS_PORT), ("telemetry", TELEMETRY_PORT)],
                false,
            )?,
        ])
        .await?;

        let monitor_name = service_monitor_name(ctx);
        match spec.service_monitor.as_ref().filter(|m| m.is_install()) {
            Some(monitor) => {
                let labels = ctx.labels(&monitor_name, COMPONENT, None);
                ctx.sync
                    .ensure(common::service_monitor(
                        ctx,
                        &monitor_name,
                        labels,
                        monitor,
                        vec![
                            json!({"port": "http-metrics", "honorLabels": true}),
                            json!({"port": "telemetry"}),
                        ],
                        json!({"matchLabels": common::selector_labels(NAME)}),
                        None,
                    ))
                    .await?;
            }
            None => {
                ctx.remove_all(vec![common::service_monitor_key(ctx, &monitor_name)])
                    .await
            }
        }
        Ok(Outcome::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{Harness, platform_monitoring, vanilla};

    #[tokio::test]
    async fn test_installed_by_default_with_filled_image() {
        let mut cr = platform_monitoring();
        cr.spec.kube_state_metrics = Some(Spec::default());
        cr.fill_empty_with_defaults();
        let harness = Harness::new(cr, vanilla("30"));

        harness.run(&KubeStateMetrics).await.unwrap();

        let deployment: appsv1::Deployment = harness.get(NAME).unwrap();
        let image = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone()
            .unwrap();
        assert!(image.starts_with("registry.k8s.io/kube-state-metrics/kube-state-metrics:"));
        assert!(harness
            .cluster::<rbacv1::ClusterRoleBinding>("monitoring-kube-state-metrics")
            .is_some());
        assert!(harness
            .custom(
                common::api::service_monitor(),
                "monitoring-kube-state-metrics-service-monitor"
            )
            .is_none());
    }

    #[tokio::test]
    async fn test_removed_when_section_disappears() {
        let mut cr = platform_monitoring();
        cr.spec.kube_state_metrics = Some(Spec {
            image: "registry.k8s.io/kube-state-metrics/kube-state-metrics:v2.12.0".to_owned(),
            ..Default::default()
        });
        let harness = Harness::new(cr, vanilla("30"));
        harness.run(&KubeStateMetrics).await.unwrap();

        harness.update(|cr| cr.spec.kube_state_metrics = None);
        harness.run(&KubeStateMetrics).await.unwrap();

        assert!(harness.get::<appsv1::Deployment>(NAME).is_none());
        assert!(harness.get::<corev1::Service>(NAME).is_none());
        assert!(harness
            .cluster::<rbacv1::ClusterRole>("monitoring-kube-state-metrics")
            .is_none());
    }
}
