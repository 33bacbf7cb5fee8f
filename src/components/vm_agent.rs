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
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::fields;
use crate::types::v1alpha1::victoriametrics::VmAgent as Spec;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

const SERVICE: &str = "vmagent-k8s";
const PORT: i32 = 8429;
const INGRESS: &str = "vmagent";

pub struct VmAgent;

/// Local storage first when it is installed, then the user's targets.
fn remote_write(ctx: &ComponentContext<'_>, spec: &Spec) -> Vec<Value> {
    let local = ctx
        .cr
        .vm_single_installed()
        .then(|| format!("{}/api/v1/write", vm_single::url(&ctx.namespace)));
    local
        .into_iter()
        .chain(spec.remote_write.iter().map(|rw| rw.url.clone()))
        .map(|url| json!({ "url": url }))
        .collect()
}

fn body(ctx: &ComponentContext<'_>, spec: &Spec) -> Value {
    let mut body = json!({
        "image": vm_single::image(&spec.image),
        "replicaCount": spec.replicas.unwrap_or(1),
        "selectAllByDefault": true,
        "serviceScrapeNamespaceSelector": {},
        "podScrapeNamespaceSelector": {},
        "remoteWrite": remote_write(ctx, spec),
    });
    body["image"]["pullPolicy"] = json!(ctx.cr.image_pull_policy());
    if let Some(interval) = &spec.scrape_interval {
        body["scrapeInterval"] = json!(interval);
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
impl Component for VmAgent {
    fn name(&self) -> &'static str {
        "vmagent"
    }

    fn display_name(&self) -> &'static str {
        "VictoriaMetrics agent"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileVictoriametricsAgentStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let resource = api::victoriametrics("VMAgent", "vmagents");
        let spec = match ctx.cr.vm_agent() {
            Some(spec) if spec.paused => {
                info!("vmagent is paused");
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{Harness, platform_monitoring, vanilla};
    use crate::types::v1alpha1::victoriametrics::{
        RemoteWrite, Victoriametrics, VmSingle,
    };

    #[tokio::test]
    async fn test_remote_write_prefers_local_storage() {
        let mut cr = platform_monitoring();
        cr.spec.victoriametrics = Some(Victoriametrics {
            vm_single: Some(VmSingle {
                image: "victoriametrics/victoria-metrics:v1.101.0".to_owned(),
                ..Default::default()
            }),
            vm_agent: Some(Spec {
                image: "victoriametrics/vmagent:v1.101.0".to_owned(),
                scrape_interval: Some("30s".to_owned()),
                remote_write: vec![RemoteWrite {
                    url: "https://remote.example.com/api/v1/write".to_owned(),
                }],
                ..Default::default()
            }),
            ..Default::default()
        });
        let harness = Harness::new(cr, vanilla("30"));

        harness.run(&VmAgent).await.unwrap();

        let agent = harness
            .custom(api::victoriametrics("VMAgent", "vmagents"), "k8s")
            .unwrap();
        let spec = &agent.data["spec"];
        assert_eq!(
            spec["remoteWrite"],
            json!([
                {"url": "http://vmsingle-k8s.monitoring.svc:8429/api/v1/write"},
                {"url": "https://remote.example.com/api/v1/write"},
            ])
        );
        assert_eq!(spec["scrapeInterval"], "30s");
        assert_eq!(spec["selectAllByDefault"], true);
    }

    #[tokio::test]
    async fn test_second_tick_writes_nothing() {
        let mut cr = platform_monitoring();
        cr.spec.victoriametrics = Some(Victoriametrics {
            vm_agent: Some(Spec {
                image: "victoriametrics/vmagent:v1.101.0".to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let harness = Harness::new(cr, vanilla("30"));

        harness.run(&VmAgent).await.unwrap();
        let writes = harness.store.writes();
        harness.run(&VmAgent).await.unwrap();
        assert_eq!(harness.store.writes(), writes);
    }
}
