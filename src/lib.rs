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

use crate::capability::{CapabilitySnapshot, Discovery, KubeDiscovery};
use crate::certs::KubePodCommands;
use crate::components::ComponentContext;
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::error_policy::error_policy;
use crate::reconcile::reconcile_monitoring;
use crate::sync::KubeStore;
use crate::types::v1alpha1::platform_monitoring::{DEFAULT_CR_NAME, PlatformMonitoring};
use futures::StreamExt;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod capability;
pub mod certs;
pub mod client;
pub mod components;
pub mod conditions;
pub mod config;
pub mod context;
pub mod error_policy;
pub mod reconcile;
pub mod sync;
pub mod types;
pub mod utils;


/// Namespace the standalone certificate refresh works in without `WATCH_NAMESPACE`.
pub const DEFAULT_NAMESPACE: &str = "monitoring";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = OperatorConfig::from_env();
    let client = Client::try_default().await?;
    let namespace = config.watch_namespace.clone();
    info!(
        namespace = namespace.as_deref().unwrap_or("<all>"),
        privileged = config.privileged,
        "starting monitoring operator"
    );

    let ns = namespace.as_deref();
    let context = Context::new(client.clone(), config);
    Controller::new(
        scoped::<PlatformMonitoring>(&client, ns),
        watcher::Config::default(),
    )
    .owns(
        scoped::<appsv1::Deployment>(&client, ns),
        watcher::Config::default(),
    )
    .owns(
        scoped::<appsv1::DaemonSet>(&client, ns),
        watcher::Config::default(),
    )
    .owns(
        scoped::<corev1::Secret>(&client, ns),
        watcher::Config::default(),
    )
    .run(reconcile_monitoring, error_policy, Arc::new(context))
    .for_each(|res| async move {
        match res {
            Ok((object, _)) => info!("reconciled successful, object {:?}", object.name),
            Err(e) => warn!("reconcile failed: {}", e),
        }
    })
    .await;

    Ok(())
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer
        .write_all(serde_yaml_ng::to_string(&PlatformMonitoring::crd())?.as_bytes())
        .await?;

    Ok(())
}

/// Fetches the etcd client certificates once and stores them in `secret`.
///
/// Unlike the reconcile loop every failure here is fatal: discovery, a
/// missing CR and a bundle that does not verify all end the process with an
/// error.
pub async fn refresh_etcd_certs(secret: String) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = OperatorConfig::from_env();
    let namespace = config
        .watch_namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned());
    let client = Client::try_default().await?;

    let discovery = KubeDiscovery::new(client.clone());
    let served = discovery.served_resources().await?;
    let minor = discovery.server_minor().await?;
    let caps = CapabilitySnapshot::from_parts(served, Some(&minor));

    let store = KubeStore::new(client.clone());
    let cr: PlatformMonitoring = sync::fetch(&store, Some(&namespace), DEFAULT_CR_NAME)
        .await?
        .ok_or_else(|| format!("PlatformMonitoring {namespace}/{DEFAULT_CR_NAME} not found"))?;

    let pods = KubePodCommands::new(client);
    let ctx = ComponentContext::new(
        &cr,
        &caps,
        &store,
        &pods,
        config.privileged,
        CancellationToken::new(),
    )?;
    info!(namespace = %namespace, secret = %secret, "refreshing etcd certificates");
    components::refresh_etcd_certificates(&ctx, &secret).await?;

    Ok(())
}
