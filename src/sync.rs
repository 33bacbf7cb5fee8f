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

//! Idempotent create-or-update and delete-if-present for any object.
//!
//! A component describes what it wants as a [`Desired`] object plus the JSON
//! pointers it owns on that object. On update only those pointers are copied
//! onto the live object; everything else (server defaults, fields other
//! controllers own) is left alone. When nothing changes no write happens.

mod store;

pub use store::{KubeStore, ObjectKey, ObjectStore};

use crate::client::ApiError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::Resource;
use kube::api::{ApiResource, DynamicObject};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get {key}: {source}"))]
    Get { key: String, source: ApiError },

    #[snafu(display("failed to create {key}: {source}"))]
    Create { key: String, source: ApiError },

    #[snafu(display("failed to update {key}: {source}"))]
    Replace { key: String, source: ApiError },

    #[snafu(display("failed to delete {key}: {source}"))]
    Delete { key: String, source: ApiError },

    #[snafu(display("failed to convert {kind}: {source}"))]
    Serialize {
        kind: String,
        source: serde_json::Error,
    },

    #[snafu(display("can not merge {pointer} into {key}: parent is not an object"))]
    Merge { key: String, pointer: String },
}

impl Error {
    fn api(&self) -> Option<&ApiError> {
        match self {
            Error::Get { source, .. }
            | Error::Create { source, .. }
            | Error::Replace { source, .. }
            | Error::Delete { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        self.api().is_some_and(ApiError::is_forbidden)
    }

    pub fn is_not_found(&self) -> bool {
        self.api().is_some_and(ApiError::is_not_found)
    }
}

/// Common managed field sets.
pub mod fields {
    pub const METADATA: &[&str] = &["/metadata/labels", "/metadata/annotations"];
    pub const SPEC: &[&str] = &["/metadata/labels", "/metadata/annotations", "/spec"];
    pub const DATA: &[&str] = &["/metadata/labels", "/data"];
    pub const ROLE: &[&str] = &["/metadata/labels", "/rules"];
    pub const ROLE_BINDING: &[&str] = &["/metadata/labels", "/subjects"];
    pub const SERVICE: &[&str] = &[
        "/metadata/labels",
        "/spec/ports",
        "/spec/selector",
        "/spec/type",
    ];
    pub const WORKLOAD: &[&str] = &[
        "/metadata/labels",
        "/spec/replicas",
        "/spec/selector",
        "/spec/template",
    ];
    pub const INGRESS: &[&str] = &[
        "/metadata/labels",
        "/metadata/annotations",
        "/spec/ingressClassName",
        "/spec/rules",
        "/spec/tls",
    ];

    /// Subtrees the API server fills with defaults. A live value counts as
    /// up to date when it contains everything the desired value sets.
    pub const SERVER_DEFAULTED: &[&str] = &["/spec/template", "/spec/ports"];
}

/// An object a component wants to exist, with the fields it owns on it.
#[derive(Clone, Debug)]
pub struct Desired {
    pub resource: ApiResource,
    pub object: DynamicObject,
    pub managed: &'static [&'static str],
    /// Skipped entirely in reduced-privilege mode.
    pub gated: bool,
    /// Older identities of the same object, removed before the object is applied.
    pub legacy: Vec<ObjectKey>,
}

impl Desired {
    pub fn typed<K>(object: &K, managed: &'static [&'static str]) -> Result<Self, Error>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let resource = ApiResource::erase::<K>(&());
        let value = serde_json::to_value(object).context(SerializeSnafu {
            kind: resource.kind.clone(),
        })?;
        let object = serde_json::from_value(value).context(SerializeSnafu {
            kind: resource.kind.clone(),
        })?;
        Ok(Self::new(resource, object, managed))
    }

    pub fn new(
        resource: ApiResource,
        object: DynamicObject,
        managed: &'static [&'static str],
    ) -> Self {
        Self {
            resource,
            object,
            managed,
            gated: false,
            legacy: Vec::new(),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn replacing(mut self, legacy: ObjectKey) -> Self {
        self.legacy.push(legacy);
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(&self.resource, &self.object)
    }
}

/// Converts a live dynamic object back into its typed form.
pub fn to_typed<K: DeserializeOwned>(object: DynamicObject) -> Result<K, Error> {
    let kind = object
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    let value = serde_json::to_value(object).context(SerializeSnafu { kind: kind.clone() })?;
    serde_json::from_value(value).context(SerializeSnafu { kind })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

/// Applies desired objects on behalf of one PlatformMonitoring resource.
pub struct Synchronizer<'a> {
    store: &'a dyn ObjectStore,
    owner: metav1::OwnerReference,
    namespace: String,
    privileged: bool,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        owner: metav1::OwnerReference,
        namespace: &str,
        privileged: bool,
    ) -> Self {
        Self {
            store,
            owner,
            namespace: namespace.to_owned(),
            privileged,
        }
    }

    pub fn store(&self) -> &'a dyn ObjectStore {
        self.store
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    /// Cluster scoped and foreign namespace objects need rights beyond the
    /// operator namespace.
    fn out_of_reach(&self, namespace: Option<&str>) -> bool {
        !self.privileged && namespace != Some(self.namespace.as_str())
    }

    fn swallow_forbidden(&self, key: &ObjectKey, error: &Error) -> bool {
        if !self.privileged && error.is_forbidden() {
            warn!(object = %key, %error, "not enough rights, skipping");
            return true;
        }
        false
    }

    pub async fn ensure(&self, desired: Desired) -> Result<Applied, Error> {
        let key = desired.key();
        if !self.privileged && (desired.gated || self.out_of_reach(key.namespace.as_deref())) {
            debug!(object = %key, "reduced privileges, skipping");
            return Ok(Applied::Skipped);
        }

        let result = async {
            for legacy in &desired.legacy {
                self.remove(legacy).await?;
            }
            self.apply(&key, desired).await
        }
        .await;

        match result {
            Err(e) if self.swallow_forbidden(&key, &e) => Ok(Applied::Skipped),
            other => other,
        }
    }

    async fn apply(&self, key: &ObjectKey, desired: Desired) -> Result<Applied, Error> {
        let live = self
            .store
            .get(key)
            .await
            .context(GetSnafu { key: key.to_string() })?;

        let Some(live) = live else {
            let mut object = desired.object;
            if key.namespace.as_deref() == Some(self.namespace.as_str()) {
                object.metadata.owner_references = Some(vec![self.owner.clone()]);
            }
            self.store
                .create(&desired.resource, &object)
                .await
                .context(CreateSnafu { key: key.to_string() })?;
            info!(object = %key, "created");
            return Ok(Applied::Created);
        };

        let kind = desired.resource.kind.clone();
        let mut merged = serde_json::to_value(&live).context(SerializeSnafu { kind: kind.clone() })?;
        let wanted =
            serde_json::to_value(&desired.object).context(SerializeSnafu { kind: kind.clone() })?;
        let changed = merge_managed(&mut merged, &wanted, desired.managed).map_err(|pointer| {
            Error::Merge {
                key: key.to_string(),
                pointer,
            }
        })?;
        if !changed {
            debug!(object = %key, "up to date");
            return Ok(Applied::Unchanged);
        }

        let merged: DynamicObject =
            serde_json::from_value(merged).context(SerializeSnafu { kind })?;
        self.store
            .replace(&desired.resource, &merged)
            .await
            .context(ReplaceSnafu { key: key.to_string() })?;
        info!(object = %key, "updated");
        Ok(Applied::Updated)
    }

    /// Deletes the object if present. Returns whether a delete was issued.
    pub async fn remove(&self, key: &ObjectKey) -> Result<bool, Error> {
        if self.out_of_reach(key.namespace.as_deref()) {
            debug!(object = %key, "reduced privileges, not removing");
            return Ok(false);
        }

        let result = async {
            let live = self
                .store
                .get(key)
                .await
                .context(GetSnafu { key: key.to_string() })?;
            if live.is_none() {
                return Ok(false);
            }
            self.store
                .delete(key)
                .await
                .context(DeleteSnafu { key: key.to_string() })?;
            info!(object = %key, "deleted");
            Ok(true)
        }
        .await;

        match result {
            Err(e) if self.swallow_forbidden(key, &e) => Ok(false),
            other => other,
        }
    }

    /// Uninstall helper: every failure is logged, none is returned.
    pub async fn remove_all(&self, keys: impl IntoIterator<Item = ObjectKey>) {
        for key in keys {
            if let Err(error) = self.remove(&key).await {
                warn!(object = %key, %error, "failed to delete");
            }
        }
    }

    /// Reads an object in its typed form.
    pub async fn get_typed<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        fetch(self.store, namespace, name).await
    }
}

/// Reads an object from `store` in its typed form. `Ok(None)` when absent.
pub async fn fetch<K>(
    store: &dyn ObjectStore,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<K>, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let key = ObjectKey::new(ApiResource::erase::<K>(&()), namespace, name);
    let live = store
        .get(&key)
        .await
        .context(GetSnafu { key: key.to_string() })?;
    live.map(to_typed::<K>).transpose()
}

/// Copies each managed pointer of `desired` onto `live`. A pointer missing
/// from `desired` is removed from `live`. Returns whether `live` changed, or
/// the offending pointer when a parent on the path is not an object.
///
/// Pointers listed in [`fields::SERVER_DEFAULTED`] are compared with
/// [`contains`] instead of equality.
pub fn merge_managed(
    live: &mut Value,
    desired: &Value,
    pointers: &[&str],
) -> Result<bool, String> {
    let mut changed = false;
    for pointer in pointers {
        match desired.pointer(pointer) {
            Some(value) => {
                let current = live.pointer(pointer);
                let up_to_date = if fields::SERVER_DEFAULTED.contains(pointer) {
                    current.is_some_and(|current| contains(current, value))
                } else {
                    current == Some(value)
                };
                if !up_to_date {
                    set_pointer(live, pointer, value.clone())
                        .ok_or_else(|| (*pointer).to_owned())?;
                    changed = true;
                }
            }
            None => {
                if remove_pointer(live, pointer) {
                    changed = true;
                }
            }
        }
    }
    Ok(changed)
}

/// Whether `live` holds every field `desired` sets. Objects may carry extra
/// keys, arrays must match element by element.
pub fn contains(live: &Value, desired: &Value) -> bool {
    match (live, desired) {
        (Value::Object(live), Value::Object(desired)) => desired
            .iter()
            .all(|(k, v)| live.get(k).is_some_and(|l| contains(l, v))),
        (Value::Array(live), Value::Array(desired)) => {
            live.len() == desired.len()
                && live.iter().zip(desired).all(|(l, d)| contains(l, d))
        }
        _ => live == desired,
    }
}

fn split_pointer(pointer: &str) -> Option<(&str, &str)> {
    let (parent, last) = pointer.rsplit_once('/')?;
    Some((parent, last))
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn set_pointer(root: &mut Value, pointer: &str, value: Value) -> Option<()> {
    let mut current = root;
    let mut tokens = pointer.split('/').skip(1).peekable();
    while let Some(token) = tokens.next() {
        let map = current.as_object_mut()?;
        let token = unescape(token);
        if tokens.peek().is_none() {
            map.insert(token, value);
            return Some(());
        }
        current = map
            .entry(token)
            .or_insert_with(|| Value::Object(Default::default()));
        if current.is_null() {
            *current = Value::Object(Default::default());
        }
    }
    None
}

fn remove_pointer(root: &mut Value, pointer: &str) -> bool {
    let Some((parent, last)) = split_pointer(pointer) else {
        return false;
    };
    let parent = if parent.is_empty() {
        Some(root)
    } else {
        root.pointer_mut(parent)
    };
    parent
        .and_then(Value::as_object_mut)
        .is_some_and(|map| map.remove(&unescape(last)).is_some())
}
