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

use crate::client::{ApiError, EncodeSnafu};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::ResourceExt;
use snafu::ResultExt;
use std::fmt;

/// Identity of a managed object. `namespace` is `None` for cluster scoped kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    pub resource: ApiResource,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(resource: ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            resource,
            namespace: namespace.map(str::to_owned),
            name: name.to_owned(),
        }
    }

    pub fn of(resource: &ApiResource, object: &DynamicObject) -> Self {
        Self {
            resource: resource.clone(),
            namespace: object.metadata.namespace.clone(),
            name: object.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.resource.kind, ns, self.name),
            None => write!(f, "{} {}", self.resource.kind, self.name),
        }
    }
}

/// Raw object access used by the synchronizer and the orchestrator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ApiError>;

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ApiError>;

    /// Full replace guarded by the object's resourceVersion.
    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ApiError>;

    /// Replace of the status subresource.
    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ApiError>;

    /// A missing object is not an error.
    async fn delete(&self, key: &ObjectKey) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ApiError> {
        let api = self.api(&key.resource, key.namespace.as_deref());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ApiError> {
        let api = self.api(resource, object.metadata.namespace.as_deref());
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ApiError> {
        let api = self.api(resource, object.metadata.namespace.as_deref());
        Ok(api
            .replace(&object.name_any(), &PostParams::default(), object)
            .await?)
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ApiError> {
        let api = self.api(resource, object.metadata.namespace.as_deref());
        let _body = serde_json::to_vec(object).context(EncodeSnafu)?;
        Ok(api
            .replace_status(&object.name_any(), &PostParams::default(), object)
            .await?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ApiError> {
        let api = self.api(&key.resource, key.namespace.as_deref());
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match ApiError::from(e) {
                e if e.is_not_found() => Ok(()),
                e => Err(e),
            },
        }
    }
}
