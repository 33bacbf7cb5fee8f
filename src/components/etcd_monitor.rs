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

//! Scraping etcd with the client certificates kept in a Secret.

use super::common::{self, object_meta};
use super::{Component, ComponentContext, Error, Outcome};
use crate::certs::{
    self, ETCD_NAMESPACE, ETCD_NAMESPACE_OPENSHIFT_V4, ETCD_SECRET_NAME, SECRET_CA_KEY,
    SECRET_CERT_KEY, SECRET_KEY_KEY,
};
use crate::sync::{Desired, fields};
use crate::types::v1alpha1::platform_monitoring::monitors;
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

const COMPONENT: &str = "monitoring-etcd";
const SERVICE_ACCOUNT: &str = "etcd-monitor";
const SERVICE_NAME: &str = "etcd";
const SERVICE_MONITOR_SUFFIX: &str = "etcd-service-monitor";

pub struct EtcdMonitor;

fn service_monitor_name(ctx: &ComponentContext<'_>) -> String {
    ctx.prefixed(SERVICE_MONITOR_SUFFIX)
}

fn etcd_namespace(ctx: &ComponentContext<'_>) -> &'static str {
    if ctx.caps.is_openshift_v4() {
        ETCD_NAMESPACE_OPENSHIFT_V4
    } else {
        ETCD_NAMESPACE
    }
}

fn etcd_labels(ctx: &ComponentContext<'_>) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("name".to_owned(), SERVICE_NAME.to_owned()),
        ("app.kubernetes.io/name".to_owned(), SERVICE_NAME.to_owned()),
        (
            "app.kubernetes.io/instance".to_owned(),
            ctx.cr.instance_label(SERVICE_NAME),
        ),
        ("app.kubernetes.io/component".to_owned(), COMPONENT.to_owned()),
    ])
}

fn service_monitor(ctx: &ComponentContext<'_>) -> Desired {
    let name = service_monitor_name(ctx);
    let mut labels = ctx.labels(&name, COMPONENT, None);
    labels.extend(ctx.cr.labels().clone());

    let secret = |key: &str| json!({"name": ETCD_SECRET_NAME, "key": key});
    let port = if ctx.caps.is_openshift_v4() {
        "etcd-metrics"
    } else {
        "metrics"
    };
    let monitor = ctx
        .cr
        .kubernetes_monitor(monitors::ETCD)
        .cloned()
        .unwrap_or_default();

    let mut desired = common::service_monitor(
        ctx,
        &name,
        labels,
        &monitor,
        vec![json!({
            "port": port,
            "scheme": "https",
            "tlsConfig": {
                "ca": {"secret": secret(SECRET_CA_KEY)},
                "cert": {"secret": secret(SECRET_CERT_KEY)},
                "keySecret": secret(SECRET_KEY_KEY),
                "insecureSkipVerify": true,
            },
        })],
        json!({"matchLabels": {"app.kubernetes.io/name": SERVICE_NAME}}),
        Some(&[etcd_namespace(ctx)][..]),
    );
    let annotations = ctx.cr.annotations();
    if !annotations.is_empty() {
        desired.object.metadata.annotations = Some(annotations.clone());
    }
    desired
}

fn service(ctx: &ComponentContext<'_>) -> Result<Desired, Error> {
    let caps = ctx.caps;
    let selector = if caps.is_openshift_v4() {
        ("etcd", "true")
    } else if caps.is_openshift_v3() {
        ("openshift.io/component", "etcd")
    } else {
        ("component", "etcd")
    };

    let mut ports = vec![
        corev1::ServicePort {
            name: Some("metrics".to_owned()),
            port: 2379,
            target_port: Some(IntOrString::Int(2379)),
            protocol: Some("TCP".to_owned()),
            ..Default::default()
        },
        corev1::ServicePort {
            name: Some("etcd-metrics".to_owned()),
            port: 9979,
            target_port: Some(IntOrString::Int(9979)),
            protocol: Some("TCP".to_owned()),
            ..Default::default()
        },
    ];
    if !caps.is_openshift_v4() {
        ports.truncate(1);
    }

    let svc = corev1::Service {
        metadata: object_meta(SERVICE_NAME, Some(etcd_namespace(ctx)), etcd_labels(ctx)),
        spec: Some(corev1::ServiceSpec {
            type_: Some("ClusterIP".to_owned()),
            cluster_ip: Some("None".to_owned()),
            selector: Some(BTreeMap::from([(
                selector.0.to_owned(),
                selector.1.to_owned(),
            )])),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(Desired::typed(&svc, fields::SERVICE)?.gated())
}

/// ServiceMonitor and, with enough rights, the etcd Service it selects.
pub async fn apply_scrape_objects(ctx: &ComponentContext<'_>) -> Result<(), Error> {
    ctx.sync.ensure(service_monitor(ctx)).await?;
    if ctx.sync.privileged() {
        ctx.sync.ensure(service(ctx)?).await?;
    }
    Ok(())
}

/// One-shot refresh into `secret`, run on a control plane node with the etcd
/// certificate directory mounted. Unlike the reconcile path every failure is
/// returned and the Secret is created when missing.
pub async fn refresh_standalone(ctx: &ComponentContext<'_>, secret: &str) -> Result<(), Error> {
    ctx.caps.server_minor_version()?;
    let bundle = if ctx.caps.is_openshift_v4() {
        certs::from_openshift_sources(ctx.sync.store()).await?
    } else {
        certs::from_host_files(ctx.pods, ctx.caps.has_route_api()).await?
    };
    bundle.verify()?;
    certs::upsert(&ctx.sync, secret, ctx.labels(secret, COMPONENT, None), &bundle).await?;
    info!(secret, "etcd certificates stored");
    apply_scrape_objects(ctx).await
}

async fn refresh_certificates(ctx: &ComponentContext<'_>, minor: u32) {
    let result = certs::refresh(
        ctx.sync.store(),
        ctx.pods,
        ctx.caps.is_openshift_v4(),
        ctx.caps.has_route_api(),
        minor,
        &ctx.namespace,
        &ctx.cancel,
    )
    .await;

    match result {
        Ok(()) => info!("etcd certificates refreshed"),
        Err(error) if error.is_forbidden() && !ctx.sync.privileged() => {
            warn!(%error, "not enough rights to read etcd certificates");
        }
        Err(error) => error!(%error, "failed to refresh etcd certificates"),
    }
}

#[async_trait]
impl Component for EtcdMonitor {
    fn name(&self) -> &'static str {
        "etcd-monitor"
    }

    fn display_name(&self) -> &'static str {
        "Etcd monitor"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileEtcdMonitorStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        if ctx.cr.kubernetes_monitor(monitors::ETCD).is_none() {
            ctx.remove_all(vec![common::service_monitor_key(
                ctx,
                &service_monitor_name(ctx),
            )])
            .await;
            return Ok(Outcome::default());
        }

        let labels = ctx.labels(ETCD_SECRET_NAME, COMPONENT, None);
        let secret = corev1::Secret {
            metadata: object_meta(ETCD_SECRET_NAME, Some(&ctx.namespace), labels.clone()),
            ..Default::default()
        };
        ctx.sync
            .ensure(Desired::typed(&secret, fields::METADATA)?)
            .await?;

        let minor = ctx.caps.server_minor_version()?;
        refresh_certificates(ctx, minor).await;

        ctx.sync
            .ensure(common::service_account(ctx, SERVICE_ACCOUNT, &labels)?)
            .await?;
        apply_scrape_objects(ctx).await?;
        Ok(Outcome::default())
    }
}
