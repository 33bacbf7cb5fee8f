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

use super::common::{self, Backend, api, object_meta};
use super::vm_single::{self, VM_COMPONENT_NAME};
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::{Desired, ObjectKey, fields};
use crate::types::v1alpha1::victoriametrics::VmAlertManager as Spec;
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

pub const SERVICE: &str = "vmalertmanager-k8s";
pub const PORT: i32 = 9093;

const INGRESS: &str = "vmalertmanager";
const CONFIG_SECRET: &str = "vmalertmanager-k8s-config";
const LEGACY_CONFIG_SECRET: &str = "alertmanager-k8s-config";
const CONFIG_KEY: &str = "alertmanager.yaml";

const DEFAULT_CONFIG: &str = "\
route:
  receiver: blackhole
  group_by: ['alertname']
receivers:
  - name: blackhole
";

pub struct VmAlertManager;

/// In-cluster URL of the alert manager.
pub fn url(namespace: &str) -> String {
    format!("http://{SERVICE}.{namespace}.svc:{PORT}")
}

fn keys(ctx: &ComponentContext<'_>) -> Vec<ObjectKey> {
    let ns = Some(ctx.namespace.as_str());
    let mut keys = common::ingress_keys(ctx, INGRESS);
    keys.extend([
        common::custom_key(
            api::victoriametrics("VMAlertmanager", "vmalertmanagers"),
            ns,
            VM_COMPONENT_NAME,
        ),
        common::key::<corev1::Secret>(ns, CONFIG_SECRET),
        common::key::<corev1::Secret>(ns, LEGACY_CONFIG_SECRET),
        common::key::<corev1::ServiceAccount>(ns, SERVICE),
    ]);
    keys
}

fn config_secret(
    ctx: &ComponentContext<'_>,
    spec: &Spec,
    labels: &BTreeMap<String, String>,
) -> Result<Desired, Error> {
    let config = spec.config_raw_yaml.as_deref().unwrap_or(DEFAULT_CONFIG);
    let secret = corev1::Secret {
        metadata: object_meta(CONFIG_SECRET, Some(&ctx.namespace), labels.clone()),
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_owned(),
            k8s_openapi::ByteString(config.as_bytes().to_vec()),
        )])),
        ..Default::default()
    };
    Ok(Desired::typed(&secret, fields::DATA)?.replacing(common::key::<corev1::Secret>(
        Some(&ctx.namespace),
        LEGACY_CONFIG_SECRET,
    )))
}

#[async_trait]
impl Component for VmAlertManager {
    fn name(&self) -> &'static str {
        "vmalertmanager"
    }

    fn display_name(&self) -> &'static str {
        "VictoriaMetrics alertmanager"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileVictoriametricsAlertManagerStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let spec = match ctx.cr.vm_alert_manager() {
            Some(spec) if spec.paused => {
                info!("vmalertmanager is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                ctx.remove_all(keys(ctx)).await;
                return Ok(Outcome::default());
            }
        };
        spec.validate()?;

        let labels = ctx.labels(SERVICE, "victoriametrics", Some(&spec.image));
        ctx.sync
            .ensure(common::service_account(ctx, SERVICE, &labels)?)
            .await?;

        let config_secret_name = match &spec.config_secret {
            Some(name) => {
                ctx.remove_all(vec![common::key::<corev1::Secret>(
                    Some(&ctx.namespace),
                    CONFIG_SECRET,
                )])
                .await;
                name.clone()
            }
            None => {
                ctx.sync.ensure(config_secret(ctx, spec, &labels)?).await?;
                CONFIG_SECRET.to_owned()
            }
        };

        let mut body = json!({
            "image": vm_single::image(&spec.image),
            "replicaCount": spec.replicas.unwrap_or(1),
            "serviceAccountName": SERVICE,
            "configSecret": config_secret_name,
            "selectAllByDefault": true,
        });
        body["image"]["pullPolicy"] = json!(ctx.cr.image_pull_policy());
        if let Some(resources) = &spec.resources {
            body["resources"] = json!(resources);
        }
        ctx.sync
            .ensure(common::custom(
                &api::victoriametrics("VMAlertmanager", "vmalertmanagers"),
                Some(&ctx.namespace),
                VM_COMPONENT_NAME,
                labels,
                json!({ "spec": body }),
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
