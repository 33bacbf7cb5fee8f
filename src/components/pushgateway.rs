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

use super::common::{self, Backend, object_meta};
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::{Desired, ObjectKey, fields};
use crate::types::v1alpha1::exporters::Pushgateway as Spec;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use serde_json::json;
use tracing::info;

const NAME: &str = "pushgateway";
const PORT: i32 = 9091;

pub struct Pushgateway;

fn service_monitor_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed("pushgateway-service-monitor")
}

fn keys(ctx: &ComponentContext<'_>) -> Vec<ObjectKey> {
    let ns = Some(ctx.namespace.as_str());
    let mut keys = common::ingress_keys(ctx, NAME);
    keys.extend([
        common::service_monitor_key(ctx, &service_monitor_name(ctx)),
        common::key::<corev1::Service>(ns, NAME),
        common::key::<appsv1::Deployment>(ns, NAME),
    ]);
    keys
}

fn deployment(ctx: &ComponentContext<'_>, spec: &Spec) -> Result<Desired, Error> {
    let labels = ctx.labels(NAME, NAME, Some(&spec.image));
    let deployment = appsv1::Deployment {
        metadata: object_meta(NAME, Some(&ctx.namespace), labels.clone()),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(spec.replicas.unwrap_or(1)),
            selector: common::label_selector(NAME),
            template: corev1::PodTemplateSpec {
                metadata: common::pod_meta(&labels),
                spec: Some(corev1::PodSpec {
                    containers: vec![corev1::Container {
                        name: NAME.to_owned(),
                        image: Some(spec.image.clone()),
                        image_pull_policy: Some(ctx.cr.image_pull_policy()),
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

#[async_trait]
impl Component for Pushgateway {
    fn name(&self) -> &'static str {
        "pushgateway"
    }

    fn display_name(&self) -> &'static str {
        "Pushgateway"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcilePushgatewayStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let spec = match ctx.cr.spec.pushgateway.as_ref() {
            Some(spec) if spec.paused => {
                info!("pushgateway is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                ctx.remove_all(keys(ctx)).await;
                return Ok(Outcome::default());
            }
        };

        let labels = ctx.labels(NAME, NAME, Some(&spec.image));
        ctx.apply_all(vec![
            deployment(ctx, spec)?,
            common::service(ctx, NAME, &labels, vec![("http", PORT)], false)?,
        ])
        .await?;

        let monitor_name = service_monitor_name(ctx);
        match spec.service_monitor.as_ref().filter(|m| m.is_install()) {
            Some(monitor) => {
                let labels = ctx.labels(&monitor_name, NAME, None);
                ctx.sync
                    .ensure(common::service_monitor(
                        ctx,
                        &monitor_name,
                        labels,
                        monitor,
                        vec![json!({"port": "http", "honorLabels": true})],
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

        common::converge_ingress(
            ctx,
            spec.ingress.as_ref(),
            Backend {
                component: NAME,
                service: NAME,
                port: PORT,
            },
        )
        .await?;
        Ok(Outcome::default())
    }
}
