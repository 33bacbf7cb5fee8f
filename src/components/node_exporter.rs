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

use super::common::{self, object_meta};
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::{Desired, ObjectKey, fields};
use crate::types::v1alpha1::exporters::NodeExporter as Spec;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use serde_json::json;
use tracing::info;

const NAME: &str = "node-exporter";
const COMPONENT: &str = "node-exporter";

/// Host paths mounted read-only into the exporter.
const HOST_MOUNTS: &[(&str, &str, &str)] = &[
    ("proc", "/proc", "/host/proc"),
    ("sys", "/sys", "/host/sys"),
    ("root", "/", "/host/root"),
];

pub struct NodeExporter;

fn service_monitor_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed("node-exporter-service-monitor")
}

fn keys(ctx: &ComponentContext<'_>) -> Vec<ObjectKey> {
    let ns = Some(ctx.namespace.as_str());
    vec![
        common::service_monitor_key(ctx, &service_monitor_name(ctx)),
        common::key::<corev1::Service>(ns, NAME),
        common::key::<appsv1::DaemonSet>(ns, NAME),
        common::key::<corev1::ServiceAccount>(ns, NAME),
    ]
}

fn daemon_set(ctx: &ComponentContext<'_>, spec: &Spec) -> Result<Desired, Error> {
    let labels = ctx.labels(NAME, COMPONENT, Some(&spec.image));
    let port = spec.port();
    let volumes = HOST_MOUNTS
        .iter()
        .map(|(name, path, _)| corev1::Volume {
            name: (*name).to_owned(),
            host_path: Some(corev1::HostPathVolumeSource {
                path: (*path).to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    let mounts = HOST_MOUNTS
        .iter()
        .map(|(name, _, mount)| corev1::VolumeMount {
            name: (*name).to_owned(),
            mount_path: (*mount).to_owned(),
            read_only: Some(true),
            ..Default::default()
        })
        .collect();

    let daemon_set = appsv1::DaemonSet {
        metadata: object_meta(NAME, Some(&ctx.namespace), labels.clone()),
        spec: Some(appsv1::DaemonSetSpec {
            selector: common::label_selector(NAME),
            template: corev1::PodTemplateSpec {
                metadata: common::pod_meta(&labels),
                spec: Some(corev1::PodSpec {
                    service_account_name: Some(NAME.to_owned()),
                    host_network: Some(true),
                    host_pid: Some(true),
                    tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
                    volumes: Some(volumes),
                    containers: vec![corev1::Container {
                        name: NAME.to_owned(),
                        image: Some(spec.image.clone()),
                        image_pull_policy: Some(ctx.cr.image_pull_policy()),
                        args: Some(vec![
                            format!("--web.listen-address=:{port}"),
                            "--path.procfs=/host/proc".to_owned(),
                            "--path.sysfs=/host/sys".to_owned(),
                            "--path.rootfs=/host/root".to_owned(),
                        ]),
                        ports: Some(common::container_ports(&[("metrics", port)])),
                        volume_mounts: Some(mounts),
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
    Ok(Desired::typed(&daemon_set, fields::WORKLOAD)?)
}

#[async_trait]
impl Component for NodeExporter {
    fn name(&self) -> &'static str {
        "node-exporter"
    }

    fn display_name(&self) -> &'static str {
        "Node exporter"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileNodeExporterStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let spec = match ctx.cr.spec.node_exporter.as_ref() {
            Some(spec) if spec.paused => {
                info!("node-exporter is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                ctx.remove_all(keys(ctx)).await;
                return Ok(Outcome::default());
            }
        };

        let labels = ctx.labels(NAME, COMPONENT, Some(&spec.image));
        ctx.apply_all(vec![
            common::service_account(ctx, NAME, &labels)?,
            daemon_set(ctx, spec)?,
            common::service(ctx, NAME, &labels, vec![("metrics", spec.port())], true)?,
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
                        vec![json!({
                            "port": "metrics",
                            "relabelings": [{
                                "sourceLabels": ["__meta_kubernetes_pod_node_name"],
                                "targetLabel": "node",
                            }],
                        })],
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
