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
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::fields;
use crate::types::v1alpha1::victoriametrics::VmSingle as Spec;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;

/// Name every VictoriaMetrics custom resource is created with.
pub const VM_COMPONENT_NAME: &str = "k8s";
pub const SERVICE: &str = "vmsingle-k8s";
pub const PORT: i32 = 8429;

const INGRESS: &str = "vmsingle";

pub struct VmSingle;

/// In-cluster URL of the single node storage.
pub fn url(namespace: &str) -> String {
    format!("http://{SERVICE}.{namespace}.svc:{PORT}")
}

/// `{repository, tag}` as the VictoriaMetrics CRDs expect it.
pub fn image(image: &str) -> Value {
    let (repository, tag) = common::split_image(image);
    json!({"repository": repository, "tag": tag})
}

pub fn extra_args(args: &std::collections::BTreeMap<String, String>) -> Option<Value> {
    (!args.is_empty()).then(|| {
        Value::Object(
            args.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<_, _>>(),
        )
    })
}

fn body(ctx: &ComponentContext<'_>, spec: &Spec) -> Value {
    let mut body = json!({
        "image": image(&spec.image),
        "replicaCount": 1,
        "retentionPeriod": spec.retention_period.as_deref().unwrap_or("1"),
    });
    body["image"]["pullPolicy"] = json!(ctx.cr.image_pull_policy());
    if let Some(storage) = &spec.storage {
        body["storage"] = json!(storage);
    }
    if let Some(resources) = &spec.resources {
        body["resources"] = json!(resources);
    }
    if let Some(args) = extra_args(&spec.extra_args) {
        body["extraArgs"] = args;
    }
    json!({ "spec": body })
}

#[async_trait]
impl Component for VmSingle {
    fn name(&self) -> &'static str {
        "vmsingle"
    }

    fn display_name(&self) -> &'static str {
        "VictoriaMetrics single"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileVictoriametricsSingleStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let resource = api::victoriametrics("VMSingle", "vmsingles");
        let backend = Backend {
            component: INGRESS,
            service: SERVICE,
            port: PORT,
        };

        let spec = match ctx.cr.vm_single() {
            Some(spec) if spec.paused => {
                info!("vmsingle is paused");
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
        common::converge_ingress(ctx, spec.ingress.as_ref(), backend).await?;
        Ok(Outcome::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{Harness, platform_monitoring, vanilla};
    use crate::types::v1alpha1::k8s::Ingress;
    use crate::types::v1alpha1::victoriametrics::Victoriametrics;
    use k8s_openapi::api::networking::v1 as networkingv1;

    fn harness(spec: Spec) -> Harness {
        let mut cr = platform_monitoring();
        cr.spec.victoriametrics = Some(Victoriametrics {
            vm_single: Some(spec),
            ..Default::default()
        });
        Harness::new(cr, vanilla("30"))
    }

    #[test]
    fn test_image_split() {
        assert_eq!(
            image("victoriametrics/victoria-metrics:v1.101.0"),
            json!({"repository": "victoriametrics/victoria-metrics", "tag": "v1.101.0"})
        );
    }

    #[tokio::test]
    async fn test_vmsingle_with_ingress() {
        let harness = harness(Spec {
            image: "victoriametrics/victoria-metrics:v1.101.0".to_owned(),
            retention_period: Some("14d".to_owned()),
            ingress: Some(Ingress {
                host: "vm.example.com".to_owned(),
                tls_secret_name: Some("vm-tls".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        });

        harness.run(&VmSingle).await.unwrap();

        let vm = harness
            .custom(api::victoriametrics("VMSingle", "vmsingles"), "k8s")
            .unwrap();
        assert_eq!(vm.data["spec"]["retentionPeriod"], "14d");
        assert_eq!(vm.data["spec"]["image"]["tag"], "v1.101.0");

        let ingress: networkingv1::Ingress = harness.get("monitoring-vmsingle").unwrap();
        let spec = ingress.spec.unwrap();
        let rule = &spec.rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("vm.example.com"));
        let backend = rule.http.as_ref().unwrap().paths[0].backend.service.clone().unwrap();
        assert_eq!(backend.name, SERVICE);
        assert_eq!(backend.port.unwrap().number, Some(PORT));
        assert_eq!(spec.tls.unwrap()[0].secret_name.as_deref(), Some("vm-tls"));
    }

    #[tokio::test]
    async fn test_empty_ingress_host_is_an_error() {
        let harness = harness(Spec {
            image: "victoriametrics/victoria-metrics:v1.101.0".to_owned(),
            ingress: Some(Ingress {
                install: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });

        let err = harness.run(&VmSingle).await.unwrap_err();
        assert_eq!(err.to_string(), "host for vmsingle ingress can not be empty");
    }

    #[tokio::test]
    async fn test_disabled_removes_cr_and_ingress() {
        let harness = harness(Spec {
            image: "victoriametrics/victoria-metrics:v1.101.0".to_owned(),
            ingress: Some(Ingress {
                host: "vm.example.com".to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        });
        harness.run(&VmSingle).await.unwrap();

        harness.update(|cr| {
            cr.spec.victoriametrics = None;
        });
        harness.run(&VmSingle).await.unwrap();

        assert!(harness
            .custom(api::victoriametrics("VMSingle", "vmsingles"), "k8s")
            .is_none());
        assert!(harness.get::<networkingv1::Ingress>("monitoring-vmsingle").is_none());
    }
}
