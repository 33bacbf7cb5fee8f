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

use crate::capability::{Discovery, KubeDiscovery};
use crate::certs::{KubePodCommands, PodCommands};
use crate::client::ApiError;
use crate::config::OperatorConfig;
use crate::sync::{self, KubeStore, ObjectKey, ObjectStore};
use crate::types;
use crate::types::v1alpha1::platform_monitoring::PlatformMonitoring;
use crate::types::v1alpha1::status::Status;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt};
use snafu::futures::TryFutureExt;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tracing::{info, warn};

pub const CONTROLLER_NAME: &str = "monitoring-operator";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Sync { source: sync::Error },

    #[snafu(display("failed to write status of {name}: {source}"))]
    Status { name: String, source: ApiError },

    #[snafu(display("failed to encode {name}: {source}"))]
    Encode {
        name: String,
        source: serde_json::Error,
    },
}

/// Where tick events go.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(
        &self,
        reference: ObjectReference,
        type_: EventType,
        reason: String,
        message: String,
    ) -> Result<(), Error>;
}

pub struct KubeEvents {
    recorder: Recorder,
}

impl KubeEvents {
    pub fn new(client: kube::Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEvents {
    async fn record(
        &self,
        reference: ObjectReference,
        type_: EventType,
        reason: String,
        message: String,
    ) -> Result<(), Error> {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason,
                    note: Some(message),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &reference,
            )
            .context(RecordSnafu)
            .await
    }
}

/// Shared by every tick.
pub struct Context {
    pub(crate) config: OperatorConfig,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) discovery: Arc<dyn Discovery>,
    pub(crate) pods: Arc<dyn PodCommands>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl Context {
    pub fn new(client: kube::Client, config: OperatorConfig) -> Self {
        Self {
            config,
            store: Arc::new(KubeStore::new(client.clone())),
            discovery: Arc::new(KubeDiscovery::new(client.clone())),
            pods: Arc::new(KubePodCommands::new(client.clone())),
            events: Arc::new(KubeEvents::new(client)),
        }
    }

    pub fn from_parts(
        config: OperatorConfig,
        store: Arc<dyn ObjectStore>,
        discovery: Arc<dyn Discovery>,
        pods: Arc<dyn PodCommands>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            store,
            discovery,
            pods,
            events,
        }
    }

    /// send event
    #[inline]
    pub async fn record(
        &self,
        resource: &PlatformMonitoring,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error> {
        self.events
            .record(
                resource.object_ref(&()),
                event_type,
                reason.to_owned(),
                message.to_owned(),
            )
            .await
    }

    /// The live CR, `None` once it is gone.
    pub async fn get(&self, name: &str, namespace: &str) -> Result<Option<PlatformMonitoring>, Error> {
        Ok(sync::fetch(self.store.as_ref(), Some(namespace), name).await?)
    }

    /// Replaces the status subresource. On failure the CR is read again and
    /// the write retried once.
    pub async fn update_status(
        &self,
        resource: &PlatformMonitoring,
        status: Status,
    ) -> Result<PlatformMonitoring, Error> {
        let name = resource.name_any();
        let namespace = resource.namespace()?;
        let api_resource = ApiResource::erase::<PlatformMonitoring>(&());

        let update_func = async |cr: &PlatformMonitoring| -> Result<PlatformMonitoring, Error> {
            let mut cr = cr.clone();
            cr.status = Some(status.clone());
            let body: DynamicObject = serde_json::to_value(&cr)
                .and_then(serde_json::from_value)
                .context(EncodeSnafu { name: name.clone() })?;
            let written = self
                .store
                .replace_status(&api_resource, &body)
                .context(StatusSnafu { name: name.clone() })
                .await?;
            Ok(sync::to_typed(written)?)
        };

        match update_func(resource).await {
            Ok(cr) => return Ok(cr),
            Err(error) => {
                info!(%error, "status update failed, retrieve the latest resource and retry.");
            }
        }

        let key = ObjectKey::new(api_resource.clone(), Some(&namespace), &name);
        let latest = self
            .store
            .get(&key)
            .context(StatusSnafu { name: name.clone() })
            .await?;
        match latest {
            Some(latest) => update_func(&sync::to_typed(latest)?).await,
            None => {
                warn!(name, "resource disappeared before its status was written");
                Err(Error::Status {
                    name: name.clone(),
                    source: ApiError::not_found(format!("{namespace}/{name}")),
                })
            }
        }
    }
}
