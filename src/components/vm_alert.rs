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

use super::common::{self, Backend, api};
use super::vm_single::{self, VM_COMPONENT_NAME};
use super::{Component, ComponentContext, Error, Outcome, vm_alertmanager};
use crate::sync::fields;
use crate::types::v1alpha1::victoriametrics::VmAlert as Spec;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

const SERVICE: &str = "vmalert-k8s";
const PORT: i32 = 8080;
const INGRESS: &str = "vmalert";

pub struct VmAlert;

fn body(ctx: &ComponentContext<'_>, spec: &Spec) -> Value {
    let storage = vm_single::url(&ctx.namespace);
    let mut body = json!({
        "image": vm_single::image(&spec.image),
        "replicaCount": spec.replicas.unwrap_or(1),
        "selectAllByDefault": true,
        "datasource": {"url": storage},
        "remoteWrite": {"url": storage},
        "remoteRead": {"url": storage},
        "evaluationInterval": spec.evaluation_interval.as_deref().unwrap_or("30s"),
    });
    body["image"]["pullPolicy"] = json!(ctx.cr.image_pull_policy());
    if ctx.cr.vm_alert_manager_installed() {
        body["notifier"] = json!({"url": vm_alertmanager::url(&ctx.namespace)});
    }
    if let Some(resources) = &spec.resources {
        body["resources"] = json!(resources);
    }
    if let Some(args) = vm_single::extra_args(&spec.extra_args) {
        body["extraArgs"] = args;
    }
    json!({ "spec": body })
}

#[async_trait]
impl Component for VmAlert {
    fn name(&self) -> &'static str {
        "vmalert"
    }

    fn display_name(&self) -> &'static str {
        "VictoriaMetrics alert"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileVictoriametricsAlertStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let resource = api::victoriametrics("VMAlert", "vmalerts");
        let spec = match ctx.cr.vm_alert() {
            Some(spec) if spec.paused => {
                info!("vmalert is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                let mut keys = common::ingress_keys(ctx, INGRESS);
                keys.push(common::custom_key(
                    resource,
                    Some(&ctx.namespace),
                    VM_COMPONENT_NAME,
                ));
                ctx.remove_all(keys).await;
                return Ok(Outcome::default());
            }
        };

        let labels = ctx.labels(SERVICE, "victoriametrics", Some(&spec.image));
        ctx.sync
            .ensure(common::custom(
                &resource,
                Some(&ctx.namespace),
                VM_COMPONENT_NAME,
                labels,
                body(ctx, spec),
                fields::SPEC,
            ))
            .await?;
        common::converge_ingress(
            ctx,
            spec.ingress.as_ref(),
            Backend {
                component: INGRESS,
                service: SERVICE,
                port: PORT,
            },
        )
        .await?;
        Ok(Outcome::default())
    }
}
