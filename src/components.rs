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

//! One reconciler per monitoring technology.
//!
//! Every component turns the CR spec into a set of [`Desired`] objects and
//! hands them to the [`Synchronizer`]. When a component is switched off it
//! removes everything it may have created. A paused component is left alone.

pub(crate) mod common;
mod etcd_monitor;
mod grafana;
mod grafana_operator;
mod kube_state_metrics;
mod kubernetes_monitors;
mod node_exporter;
mod pushgateway;
mod vm_agent;
mod vm_alert;
mod vm_alertmanager;
mod vm_auth;
mod vm_operator;
mod vm_single;
mod vm_user;

pub use etcd_monitor::refresh_standalone as refresh_etcd_certificates;
pub use grafana::reset_admin_credentials;

use crate::capability::{self, CapabilitySnapshot};
use crate::certs::{self, PodCommands};
use crate::client::ApiError;
use crate::sync::{self, Desired, ObjectKey, ObjectStore, Synchronizer};
use crate::types;
use crate::types::v1alpha1::platform_monitoring::PlatformMonitoring;
use async_trait::async_trait;
use snafu::Snafu;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Config { source: types::error::Error },

    #[snafu(transparent)]
    Sync { source: sync::Error },

    #[snafu(transparent)]
    Certs { source: certs::Error },

    #[snafu(transparent)]
    Capability { source: capability::Error },

    #[snafu(display("timed out waiting for {what}"))]
    Timeout { what: String },

    #[snafu(display("cancelled while waiting for {what}"))]
    Cancelled { what: String },

    #[snafu(display("no running pod matches {selector}"))]
    NoRunningPod { selector: String },

    #[snafu(display("failed to list pods matching {selector}: {source}"))]
    ListPods { selector: String, source: ApiError },

    #[snafu(display("failed to run command in {pod}: {source}"))]
    Exec { pod: String, source: ApiError },

    #[snafu(display("secret {secret} has no admin password"))]
    MissingCredentials { secret: String },
}

/// What a component reports back besides success.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Grafana admin credentials differ from the ones last applied to the
    /// running instance. Stays set until a reset succeeds.
    pub admin_credentials_changed: bool,
}

/// Everything a component needs during one tick.
pub struct ComponentContext<'a> {
    pub cr: &'a PlatformMonitoring,
    pub namespace: String,
    pub caps: &'a CapabilitySnapshot,
    pub sync: Synchronizer<'a>,
    pub pods: &'a dyn PodCommands,
    pub cancel: CancellationToken,
}

impl<'a> ComponentContext<'a> {
    pub fn new(
        cr: &'a PlatformMonitoring,
        caps: &'a CapabilitySnapshot,
        store: &'a dyn ObjectStore,
        pods: &'a dyn PodCommands,
        privileged: bool,
        cancel: CancellationToken,
    ) -> Result<Self, types::error::Error> {
        let namespace = cr.namespace()?;
        let sync = Synchronizer::new(store, cr.new_owner_ref(), &namespace, privileged);
        Ok(Self {
            cr,
            namespace,
            caps,
            sync,
            pods,
            cancel,
        })
    }

    /// `<namespace>-<suffix>`, the naming scheme for monitors and ingresses.
    pub fn prefixed(&self, suffix: &str) -> String {
        format!("{}-{}", self.namespace, suffix)
    }

    pub fn labels(
        &self,
        name: &str,
        component: &str,
        image: Option<&str>,
    ) -> BTreeMap<String, String> {
        common::standard_labels(self.cr, name, component, image)
    }

    pub async fn apply_all(&self, desired: Vec<Desired>) -> Result<(), Error> {
        for object in desired {
            self.sync.ensure(object).await?;
        }
        Ok(())
    }

    pub async fn remove_all(&self, keys: Vec<ObjectKey>) {
        self.sync.remove_all(keys).await;
    }
}

#[async_trait]
pub trait Component: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Human name used in condition messages.
    fn display_name(&self) -> &'static str;

    /// Condition reason for failures. `None` means failures are only logged.
    fn reason(&self) -> Option<&'static str>;

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error>;
}

/// Components in reconcile order. Operators that install CRDs come first.
pub fn all() -> Vec<Box<dyn Component>> {
    vec![
        Box::new(kubernetes_monitors::KubernetesMonitors),
        Box::new(etcd_monitor::EtcdMonitor),
        Box::new(vm_operator::VmOperator),
        Box::new(vm_single::VmSingle),
        Box::new(vm_user::VmUser),
        Box::new(vm_agent::VmAgent),
        Box::new(vm_auth::VmAuth),
        Box::new(vm_alertmanager::VmAlertManager),
        Box::new(vm_alert::VmAlert),
        Box::new(kube_state_metrics::KubeStateMetrics),
        Box::new(node_exporter::NodeExporter),
        Box::new(grafana_operator::GrafanaOperator),
        Box::new(grafana::Grafana),
        Box::new(pushgateway::Pushgateway),
    ]
}
