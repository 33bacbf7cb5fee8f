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

//! Running commands inside pods over the exec websocket.

use crate::client::{ApiError, CommandFailedSnafu, StreamSnafu};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, ListParams};
use kube::ResourceExt;
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodCommands: Send + Sync {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ApiError>;

    /// Runs `command` in `container` with stdout and stderr captured, no stdin
    /// and no TTY.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, ApiError>;
}

pub struct KubePodCommands {
    client: kube::Client,
}

impl KubePodCommands {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

async fn read_stream(reader: Option<impl AsyncRead + Unpin>) -> Result<String, ApiError> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await.context(StreamSnafu)?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[async_trait]
impl PodCommands for KubePodCommands {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ApiError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, ApiError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true)
            .tty(false);

        let mut attached = api.exec(pod, command, &params).await?;
        let (stdout, stderr) = tokio::try_join!(
            read_stream(attached.stdout()),
            read_stream(attached.stderr())
        )?;

        if let Some(status) = attached.take_status() {
            if let Some(status) = status.await {
                debug!(pod, ?status, "exec finished");
                if status.status.as_deref() == Some("Failure") {
                    return CommandFailedSnafu {
                        pod,
                        message: status.message.unwrap_or(stderr),
                    }
                    .fail();
                }
            }
        }

        Ok(ExecOutput { stdout, stderr })
    }
}

pub fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

pub fn running_pod_names(pods: &[Pod]) -> Vec<String> {
    pods.iter()
        .filter(|p| is_running(p))
        .map(|p| p.name_any())
        .collect()
}
