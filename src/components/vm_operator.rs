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
use crate::types::v1alpha1::victoriametrics::VmOperator as Spec;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::rbac::v1 as rbacv1;
use serde_json::json;
use tracing::info;

const NAME: &str = "victoriametrics-operator";
const COMPONENT: &str = "victoriametrics";
const PORT: i32 = 8080;

pub struct VmOperator;

impl VmOperator {
    fn cluster_name(ctx: &ComponentContext<'_>) -> String {
        ctx.prefixed(NAME)
    }

    fn service_monitor_name(ctx: &ComponentContext<'_>) -> String {
        ctx.prefixed("victoriametrics-operator-service-monitor")
    }

    fn keys(ctx: &ComponentContext<'_>) -> Vec<ObjectKey> {
        let ns = Some(ctx.namespace.as_str());
        let cluster = Self::cluster_name(ctx);
        vec![
            common::service_monitor_key(ctx, &Self::service_monitor_name(ctx)),
            common::key::<corev1::Service>(ns, NAME),
            common::key::<appsv1::Deployment>(ns, NAME),
            common::key::<rbacv1::RoleBinding>(ns, NAME),
            common::key::<rbacv1::Role>(ns, NAME),
            common::key::<rbacv1::ClusterRoleBinding>(None, &cluster),
            common::key::<rbacv1::ClusterRole>(None, &cluster),
            common::key::<corev1::ServiceAccount>(ns, NAME),
        ]
    }

    fn cluster_rules() -> Vec<rbacv1::PolicyRule> {
        vec![
            rule(&["operator.victoriametrics.com"], &["*"], &["*"]),
            rule(&["monitoring.coreos.com"], &["*"], &["get", "list", "watch"]),
            rule(
                &[""],
                &["nodes", "nodes/metrics", "endpoints", "pods", "services", "namespaces"],
                &["get", "list", "watch"],
            ),
            rule(&["discovery.k8s.io"], &["endpointslices"], &["get", "list", "watch"]),
            rule(
                &["networking.k8s.io"],
                &["ingresses"],
                &["get", "list", "watch"],
            ),
            rule(
                &["rbac.authorization.k8s.io"],
                &["clusterroles", "clusterrolebindings"],
                &["get", "list", "watch", "create", "update", "delete"],
            ),
            rule(&["apiextensions.k8s.io"], &["customresourcedefinitions"], &["get", "list"]),
        ]
    }

    fn namespace_rules() -> Vec<rbacv1::PolicyRule> {
        vec![
            rule(
                &[""],
                &[
                    "configmaps",
                    "secrets",
                    "services",
                    "serviceaccounts",
                    "persistentvolumeclaims",
                    "events",
                ],
                &["*"],
            ),
            rule(&["apps"], &["deployments", "statefulsets", "daemonsets"], &["*"]),
            rule(&["policy"], &["poddisruptionbudgets"], &["*"]),
            rule(&["rbac.authorization.k8s.io"], &["roles", "rolebindings"], &["*"]),
            rule(&["coordination.k8s.io"], &["leases"], &["*"]),
        ]
    }

    fn deployment(ctx: &ComponentContext<'_>, spec: &Spec) -> Result<Desired, Error> {
        let labels = ctx.labels(NAME, COMPONENT, Some(&spec.image));
        let mut pod_labels = labels.clone();
        pod_labels.extend(spec.labels.clone());

        let deployment = appsv1::Deployment {
            metadata: object_meta(NAME, Some(&ctx.namespace), labels),
            spec: Some(appsv1::DeploymentSpec {
                replicas: Some(spec.replicas.unwrap_or(1)),
                selector: common::label_selector(NAME),
                template: corev1::PodTemplateSpec {
                    metadata: common::pod_meta(&pod_labels),
                    spec: Some(corev1::PodSpec {
                        service_account_name: Some(NAME.to_owned()),
                        node_selector: (!spec.node_selector.is_empty())
                            .then(|| spec.node_selector.clone()),
                        tolerations: (!spec.tolerations.is_empty())
                            .then(|| spec.tolerations.clone()),
                        containers: vec![corev1::Container {
                            name: NAME.to_owned(),
                            image: Some(spec.image.clone()),
                            image_pull_policy: Some(ctx.cr.image_pull_policy()),
                            args: Some(vec![
                                "--leader-elect".to_owned(),
                                format!("--metrics-addr=:{PORT}"),
                            ]),
                            env: Some(vec![corev1::EnvVar {
                                name: "WATCH_NAMESPACE".to_owned(),
                                value: Some(ctx.namespace.clone()),
                                ..Default::default()
                            }]),
                            ports: Some(common::container_ports(&[("http", PORT)])),
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

    fn desired(ctx: &ComponentContext<'_>, spec: &Spec) -> Result<Vec<Desired>, Error> {
        let labels = ctx.labels(NAME, COMPONENT, Some(&spec.image));
        let cluster = Self::cluster_name(ctx);
        Ok(vec![
            common::service_account(ctx, NAME, &labels)?,
            common::cluster_role(&cluster, &labels, Self::cluster_rules())?,
            common::cluster_role_binding(ctx, &cluster, &labels, NAME)?,
            common::role(ctx, NAME, &labels, Self::namespace_rules())?,
            common::role_binding(ctx, NAME, &labels, NAME)?,
            Self::deployment(ctx, spec)?,
            common::service(ctx, NAME, &labels, vec![("http", PORT)], false)?,
        ])
    }
}

#[async_trait]
impl Component for VmOperator {
    fn name(&self) -> &'static str {
        "vm-operator"
    }

    fn display_name(&self) -> &'static str {
        "VictoriaMetrics operator"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileVictoriametricsOperatorStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let spec = match ctx.cr.vm_operator() {
            Some(spec) if spec.paused => {
                info!("victoriametrics operator is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                ctx.remove_all(Self::keys(ctx)).await;
                return Ok(Outcome::default());
            }
        };

        ctx.apply_all(Self::desired(ctx, spec)?).await?;

        let monitor_name = Self::service_monitor_name(ctx);
        match spec.service_monitor.as_ref().filter(|m| m.is_install()) {
            Some(monitor) => {
                let labels = ctx.labels(&monitor_name, COMPONENT, None);
                ctx.sync
                    .ensure(common::service_monitor(
                        ctx,
                        &monitor_name,
                        labels,
                        monitor,
                        vec![json!({"port": "http"})],
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
    use crate::types::v1alpha1::k8s::Monitor;
    use crate::types::v1alpha1::victoriametrics::Victoriametrics;

    fn with_operator(spec: Spec) -> Harness {
        let mut cr = platform_monitoring();
        cr.spec.victoriametrics = Some(Victoriametrics {
            vm_operator: Some(spec),
            ..Default::default()
        });
        Harness::new(cr, vanilla("30"))
    }

    fn spec() -> Spec {
        Spec {
            image: "victoriametrics/operator:v0.44.0".to_owned(),
            service_monitor: Some(Monitor {
                install: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_install_and_uninstall() {
        let harness = with_operator(spec());
        harness.run(&VmOperator).await.unwrap();

        let deployment: appsv1::Deployment = harness.get(NAME).unwrap();
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("victoriametrics/operator:v0.44.0"));
        assert!(harness
            .cluster::<rbacv1::ClusterRole>("monitoring-victoriametrics-operator")
            .is_some());
        assert!(harness.get::<corev1::Service>(NAME).is_some());
        assert!(harness
            .custom(
                common::api::service_monitor(),
                "monitoring-victoriametrics-operator-service-monitor"
            )
            .is_some());

        harness.update(|cr| {
            if let Some(op) = cr
                .spec
                .victoriametrics
                .as_mut()
                .and_then(|vm| vm.vm_operator.as_mut())
            {
                op.install = Some(false);
            }
        });
        harness.run(&VmOperator).await.unwrap();

        assert!(harness.get::<appsv1::Deployment>(NAME).is_none());
        assert!(harness.get::<corev1::ServiceAccount>(NAME).is_none());
        assert!(harness
            .cluster::<rbacv1::ClusterRole>("monitoring-victoriametrics-operator")
            .is_none());
        assert!(harness
            .custom(
                common::api::service_monitor(),
                "monitoring-victoriametrics-operator-service-monitor"
            )
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_image_is_not_installed() {
        let harness = with_operator(Spec::default());
        harness.run(&VmOperator).await.unwrap();
        assert!(harness.get::<appsv1::Deployment>(NAME).is_none());
    }

    #[tokio::test]
    async fn test_paused_is_left_alone() {
        let harness = with_operator(spec());
        harness.run(&VmOperator).await.unwrap();
        let writes = harness.store.writes();

        harness.update(|cr| {
            if let Some(op) = cr
                .spec
                .victoriametrics
                .as_mut()
                .and_then(|vm| vm.vm_operator.as_mut())
            {
                op.paused = true;
                op.install = Some(false);
            }
        });
        harness.run(&VmOperator).await.unwrap();

        assert_eq!(harness.store.writes(), writes);
        assert!(harness.get::<appsv1::Deployment>(NAME).is_some());
    }

    #[tokio::test]
    async fn test_unprivileged_skips_cluster_rbac() {
        let harness = with_operator(spec()).unprivileged();
        harness.run(&VmOperator).await.unwrap();

        assert!(harness.get::<appsv1::Deployment>(NAME).is_some());
        assert!(harness
            .cluster::<rbacv1::ClusterRole>("monitoring-victoriametrics-operator")
            .is_none());
        assert!(harness
            .cluster::<rbacv1::ClusterRoleBinding>("monitoring-victoriametrics-operator")
            .is_none());
    }
}
