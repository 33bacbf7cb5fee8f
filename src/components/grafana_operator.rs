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

use super::common::{self, object_meta, rule, split_image};
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::{Desired, ObjectKey, fields};
use crate::types::v1alpha1::grafana::Grafana as Spec;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::rbac::v1 as rbacv1;
use serde_json::json;
use tracing::info;

const NAME: &str = "grafana-operator";
const COMPONENT: &str = "grafana";
const METRICS_PORT: i32 = 8080;

pub struct GrafanaOperator;

fn cluster_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed(NAME)
}

fn pod_monitor_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed("grafana-operator-pod-monitor")
}

fn keys(ctx: &ComponentContext<'_>) -> Vec<ObjectKey> {
    let ns = Some(ctx.namespace.as_str());
    let cluster = cluster_name(ctx);
    vec![
        common::pod_monitor_key(ctx, &pod_monitor_name(ctx)),
        common::key::<appsv1::Deployment>(ns, NAME),
        common::key::<rbacv1::ClusterRoleBinding>(None, &cluster),
        common::key::<rbacv1::ClusterRole>(None, &cluster),
        common::key::<rbacv1::RoleBinding>(ns, NAME),
        common::key::<rbacv1::Role>(ns, NAME),
        common::key::<corev1::ServiceAccount>(ns, NAME),
    ]
}

fn namespace_rules() -> Vec<rbacv1::PolicyRule> {
    vec![
        rule(&["integreatly.org"], &["*"], &["*"]),
        rule(
            &[""],
            &["configmaps", "secrets", "services", "serviceaccounts", "pods", "events"],
            &["*"],
        ),
        rule(&["apps"], &["deployments"], &["*"]),
        rule(&["networking.k8s.io", "extensions"], &["ingresses"], &["*"]),
        rule(&["route.openshift.io"], &["routes", "routes/custom-host"], &["*"]),
        rule(&["coordination.k8s.io"], &["leases"], &["*"]),
    ]
}

fn cluster_rules() -> Vec<rbacv1::PolicyRule> {
    vec![
        rule(
            &["integreatly.org"],
            &["grafanadashboards", "grafanadatasources", "grafananotificationchannels"],
            &["get", "list", "watch"],
        ),
        rule(&[""], &["namespaces", "configmaps"], &["get", "list", "watch"]),
    ]
}

fn deployment(ctx: &ComponentContext<'_>, spec: &Spec) -> Result<Desired, Error> {
    let operator = &spec.operator;
    let labels = ctx.labels(NAME, COMPONENT, Some(&operator.image));
    let (grafana_repo, grafana_tag) = split_image(&spec.image);
    let (init_repo, init_tag) = split_image(&operator.init_container_image);

    let mut args = vec![
        format!("--grafana-image={grafana_repo}"),
        format!("--grafana-image-tag={grafana_tag}"),
        format!("--grafana-plugins-init-container-image={init_repo}"),
        format!("--grafana-plugins-init-container-tag={init_tag}"),
        format!("--namespaces={}", ctx.namespace),
        "--scan-all=false".to_owned(),
    ];
    if let Some(level) = &operator.log_level {
        args.push(format!("--zap-level={level}"));
    }

    let deployment = appsv1::Deployment {
        metadata: object_meta(NAME, Some(&ctx.namespace), labels.clone()),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(1),
            selector: common::label_selector(NAME),
            template: corev1::PodTemplateSpec {
                metadata: common::pod_meta(&labels),
                spec: Some(corev1::PodSpec {
                    service_account_name: Some(NAME.to_owned()),
                    containers: vec![corev1::Container {
                        name: NAME.to_owned(),
                        image: Some(operator.image.clone()),
                        image_pull_policy: Some(ctx.cr.image_pull_policy()),
                        args: Some(args),
                        env: Some(vec![corev1::EnvVar {
                            name: "WATCH_NAMESPACE".to_owned(),
                            value: Some(ctx.namespace.clone()),
                            ..Default::default()
                        }]),
                        ports: Some(common::container_ports(&[("metrics", METRICS_PORT)])),
                        resources: operator.resources.clone(),
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
impl Component for GrafanaOperator {
    fn name(&self) -> &'static str {
        "grafana-operator"
    }

    fn display_name(&self) -> &'static str {
        "Grafana operator"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileGrafanaOperatorStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let spec = match ctx.cr.spec.grafana.as_ref() {
            Some(spec) if spec.operator.paused => {
                info!("grafana operator is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                ctx.remove_all(keys(ctx)).await;
                return Ok(Outcome::default());
            }
        };

        let labels = ctx.labels(NAME, COMPONENT, Some(&spec.operator.image));
        let cluster = cluster_name(ctx);
        ctx.apply_all(vec![
            common::service_account(ctx, NAME, &labels)?,
            common::role(ctx, NAME, &labels, namespace_rules())?,
            common::role_binding(ctx, NAME, &labels, NAME)?,
            common::cluster_role(&cluster, &labels, cluster_rules())?,
            common::cluster_role_binding(ctx, &cluster, &labels, NAME)?,
            deployment(ctx, spec)?,
        ])
        .await?;

        let monitor_name = pod_monitor_name(ctx);
        match spec.operator.pod_monitor.as_ref().filter(|m| m.is_install()) {
            Some(monitor) => {
                let labels = ctx.labels(&monitor_name, COMPONENT, None);
                ctx.sync
                    .ensure(common::pod_monitor(
                        ctx,
                        &monitor_name,
                        labels,
                        monitor,
                        vec![json!({"port": "metrics"})],
                        json!({"matchLabels": common::selector_labels(NAME)}),
                        json!({"matchNames": [ctx.namespace]}),
                    ))
                    .await?;
            }
            None => {
                ctx.remove_all(vec![common::pod_monitor_key(ctx, &monitor_name)])
                    .await
            }
        }
        Ok(Outcome::default())
    }
}
