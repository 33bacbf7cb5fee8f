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

//! Grafana instance, its datasource and admin credential rotation.
//!
//! Credentials are rotated by dropping a `grafana-admin-credentials-temp`
//! Secret next to the CR. Its data is copied into the Secret Grafana reads,
//! which the Grafana operator creates. Grafana only reads that Secret on first
//! start, so the orchestrator calls [`reset_admin_credentials`] until the
//! digest of the applied password is recorded on it.

use super::common::{self, Backend, api, object_meta};
use super::{
    Component, ComponentContext, Error, ExecSnafu, ListPodsSnafu, MissingCredentialsSnafu,
    NoRunningPodSnafu, Outcome, vm_single,
};
use crate::certs::exec;
use crate::sync::{Applied, Desired, ObjectKey, fields};
use crate::types::v1alpha1::grafana::Grafana as Spec;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde_json::json;
use sha2::{Digest, Sha256};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub const ADMIN_CREDENTIALS: &str = "grafana-admin-credentials";
pub const ADMIN_CREDENTIALS_TEMP: &str = "grafana-admin-credentials-temp";
const PASSWORD_KEY: &str = "GF_SECURITY_ADMIN_PASSWORD";

/// SHA-256 of the password last applied to the running Grafana.
pub const APPLIED_PASSWORD_ANNOTATION: &str = "monitoring.qubership.org/applied-password-sha256";
const APPLIED_PASSWORD_FIELDS: &[&str] =
    &["/metadata/annotations/monitoring.qubership.org~1applied-password-sha256"];

const NAME: &str = "grafana";
const DATASOURCE: &str = "platform-monitoring-prometheus";
const SERVICE: &str = "grafana-service";
const PORT: i32 = 3000;
const DEPLOYMENT: &str = "grafana-deployment";
const POD_SELECTOR: &str = "app=grafana";
const CONTAINER: &str = "grafana";

const PROMETHEUS_FALLBACK_URL: &str = "prometheus-operated";
const PROMETHEUS_FALLBACK_PORT: i32 = 9090;

const READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const READY_POLL: Duration = Duration::from_secs(5);

/// Only the data is compared, so a label change does not rotate the password.
const CREDENTIAL_FIELDS: &[&str] = &["/data"];

pub struct Grafana;

fn pod_monitor_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed("grafana-pod-monitor")
}

fn keys(ctx: &ComponentContext<'_>) -> Vec<ObjectKey> {
    let ns = Some(ctx.namespace.as_str());
    let mut keys = common::ingress_keys(ctx, NAME);
    keys.extend([
        common::pod_monitor_key(ctx, &pod_monitor_name(ctx)),
        common::custom_key(api::grafana_datasource(), ns, DATASOURCE),
        common::custom_key(api::grafana(), ns, NAME),
    ]);
    keys
}

/// VMSingle when it is installed, the Prometheus service otherwise.
pub fn datasource_url(ctx: &ComponentContext<'_>) -> String {
    if ctx.cr.vm_single_installed() {
        vm_single::url(&ctx.namespace)
    } else {
        format!(
            "http://{PROMETHEUS_FALLBACK_URL}.{}.svc:{PROMETHEUS_FALLBACK_PORT}",
            ctx.namespace
        )
    }
}

fn config(spec: &Spec) -> BTreeMap<String, BTreeMap<String, String>> {
    let section = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<BTreeMap<_, _>>()
    };
    let mut config = BTreeMap::from([
        ("log".to_owned(), section(&[("mode", "console"), ("level", "warn")])),
        ("auth".to_owned(), section(&[("disable_login_form", "false")])),
        ("users".to_owned(), section(&[("default_theme", "light")])),
    ]);
    for (name, values) in &spec.config {
        config
            .entry(name.clone())
            .or_default()
            .extend(values.clone());
    }
    config
}

fn grafana(ctx: &ComponentContext<'_>, spec: &Spec) -> Desired {
    let mut body = json!({
        "baseImage": spec.image,
        "config": config(spec),
        "deployment": {
            "replicas": spec.replicas.unwrap_or(1),
            "skipCreateAdminAccount": false,
        },
        "service": {"name": SERVICE},
        "dashboardLabelSelector": [{
            "matchExpressions": [{
                "key": "app.kubernetes.io/component",
                "operator": "In",
                "values": ["monitoring"],
            }],
        }],
    });
    if let Some(resources) = &spec.resources {
        body["resources"] = json!(resources);
    }
    common::custom(
        &api::grafana(),
        Some(&ctx.namespace),
        NAME,
        ctx.labels(NAME, NAME, Some(&spec.image)),
        json!({ "spec": body }),
        fields::SPEC,
    )
}

fn datasource(ctx: &ComponentContext<'_>) -> Desired {
    common::custom(
        &api::grafana_datasource(),
        Some(&ctx.namespace),
        DATASOURCE,
        ctx.labels(DATASOURCE, NAME, None),
        json!({"spec": {
            "name": format!("{DATASOURCE}.yaml"),
            "datasources": [{
                "name": "Platform Monitoring Prometheus",
                "type": "prometheus",
                "access": "proxy",
                "url": datasource_url(ctx),
                "isDefault": true,
                "editable": true,
                "version": 1,
                "jsonData": {"timeInterval": "5s", "tlsSkipVerify": true},
            }],
        }}),
        fields::SPEC,
    )
}

fn password_digest(password: &ByteString) -> String {
    Sha256::digest(&password.0)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn applied_digest(secret: &corev1::Secret) -> Option<&String> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(APPLIED_PASSWORD_ANNOTATION))
}

/// Copies the temporary credentials over the live ones. Returns whether the
/// password in them still has to be applied to Grafana.
async fn copy_admin_credentials(ctx: &ComponentContext<'_>) -> Result<bool, Error> {
    let Some(temp) = ctx
        .sync
        .get_typed::<corev1::Secret>(Some(&ctx.namespace), ADMIN_CREDENTIALS_TEMP)
        .await?
    else {
        return Ok(false);
    };
    let Some(live) = ctx
        .sync
        .get_typed::<corev1::Secret>(Some(&ctx.namespace), ADMIN_CREDENTIALS)
        .await?
    else {
        debug!(secret = ADMIN_CREDENTIALS, "not created by the grafana operator yet");
        return Ok(false);
    };

    let wanted = temp
        .data
        .as_ref()
        .and_then(|data| data.get(PASSWORD_KEY))
        .map(password_digest);
    let pending = wanted.is_some() && wanted.as_ref() != applied_digest(&live);

    let secret = corev1::Secret {
        metadata: object_meta(
            ADMIN_CREDENTIALS,
            Some(&ctx.namespace),
            ctx.labels(ADMIN_CREDENTIALS, NAME, None),
        ),
        data: temp.data,
        ..Default::default()
    };
    if ctx
        .sync
        .ensure(Desired::typed(&secret, CREDENTIAL_FIELDS)?)
        .await?
        == Applied::Updated
    {
        info!(secret = ADMIN_CREDENTIALS, "admin credentials copied");
    }
    Ok(pending)
}

/// Records the digest of `password` on the live credentials Secret.
async fn mark_applied(ctx: &ComponentContext<'_>, password: &ByteString) -> Result<(), Error> {
    let secret = corev1::Secret {
        metadata: metav1::ObjectMeta {
            name: Some(ADMIN_CREDENTIALS.to_owned()),
            namespace: Some(ctx.namespace.clone()),
            annotations: Some(BTreeMap::from([(
                APPLIED_PASSWORD_ANNOTATION.to_owned(),
                password_digest(password),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };
    ctx.sync
        .ensure(Desired::typed(&secret, APPLIED_PASSWORD_FIELDS)?)
        .await?;
    Ok(())
}

fn is_ready(deployment: &appsv1::Deployment) -> bool {
    let wanted = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
        .max(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= wanted
}

async fn poll_ready(ctx: &ComponentContext<'_>) -> Result<(), Error> {
    loop {
        let deployment = ctx
            .sync
            .get_typed::<appsv1::Deployment>(Some(&ctx.namespace), DEPLOYMENT)
            .await?;
        if deployment.as_ref().is_some_and(is_ready) {
            return Ok(());
        }
        debug!(deployment = DEPLOYMENT, "waiting for grafana to become ready");
        tokio::time::sleep(READY_POLL).await;
    }
}

async fn wait_until_ready(ctx: &ComponentContext<'_>) -> Result<(), Error> {
    let what = format!("deployment {DEPLOYMENT}");
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(Error::Cancelled { what }),
        res = tokio::time::timeout(READY_TIMEOUT, poll_ready(ctx)) => {
            res.map_err(|_| Error::Timeout { what })?
        }
    }
}

/// Applies the password from `grafana-admin-credentials` to the running
/// Grafana once its deployment is ready, then records it as applied.
pub async fn reset_admin_credentials(ctx: &ComponentContext<'_>) -> Result<(), Error> {
    wait_until_ready(ctx).await?;

    let raw = ctx
        .sync
        .get_typed::<corev1::Secret>(Some(&ctx.namespace), ADMIN_CREDENTIALS)
        .await?
        .and_then(|s| s.data)
        .and_then(|mut data| data.remove(PASSWORD_KEY))
        .context(MissingCredentialsSnafu {
            secret: ADMIN_CREDENTIALS,
        })?;
    let password = String::from_utf8_lossy(&raw.0).into_owned();

    let pods = ctx
        .pods
        .list_pods(&ctx.namespace, POD_SELECTOR)
        .await
        .context(ListPodsSnafu {
            selector: POD_SELECTOR,
        })?;
    let pod = exec::running_pod_names(&pods)
        .into_iter()
        .next()
        .context(NoRunningPodSnafu {
            selector: POD_SELECTOR,
        })?;

    let command = ["grafana", "cli", "admin", "reset-admin-password", &password]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            return Err(Error::Cancelled { what: format!("exec in {pod}") });
        }
        res = ctx.pods.exec(&ctx.namespace, &pod, CONTAINER, command) => {
            res.context(ExecSnafu { pod: pod.clone() })?;
        }
    }
    info!(pod = %pod, "grafana admin password reset");
    mark_applied(ctx, &raw).await
}

fn pod_monitor(ctx: &ComponentContext<'_>, spec: &Spec) -> Option<Desired> {
    let monitor = spec.pod_monitor.as_ref().filter(|m| m.is_install())?;
    let name = pod_monitor_name(ctx);
    Some(common::pod_monitor(
        ctx,
        &name,
        ctx.labels(&name, NAME, None),
        monitor,
        vec![json!({"port": "grafana-http"})],
        json!({"matchLabels": {"app": NAME}}),
        json!({"matchNames": [ctx.namespace]}),
    ))
}

#[async_trait]
impl Component for Grafana {
    fn name(&self) -> &'static str {
        "grafana"
    }

    fn display_name(&self) -> &'static str {
        "Grafana"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileGrafanaStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let spec = match ctx.cr.spec.grafana.as_ref() {
            Some(spec) if spec.paused => {
                info!("grafana is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() => spec,
            _ => {
                ctx.remove_all(keys(ctx)).await;
                return Ok(Outcome::default());
            }
        };

        let admin_credentials_changed = copy_admin_credentials(ctx).await?;
        ctx.apply_all(vec![grafana(ctx, spec), datasource(ctx)]).await?;

        match pod_monitor(ctx, spec) {
            Some(desired) => {
                ctx.sync.ensure(desired).await?;
            }
            None => {
                ctx.remove_all(vec![common::pod_monitor_key(ctx, &pod_monitor_name(ctx))])
                    .await
            }
        }

        common::converge_ingress(
            ctx,
            spec.ingress.as_ref(),
            Backend {
                component: NAME,
                service: SERVICE,
                port: PORT,
            },
        )
        .await?;
        Ok(Outcome {
            admin_credentials_changed,
        })
    }
}
