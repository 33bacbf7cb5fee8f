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

//! Per-tick platform facts: which APIs the cluster serves and which version it runs.

use crate::client::ApiError;
use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use tracing::{debug, error};

pub const ROUTE_GROUP_VERSION: &str = "route.openshift.io/v1";
pub const ROUTE_KIND: &str = "Route";
pub const INGRESS_V1_GROUP_VERSION: &str = "networking.k8s.io/v1";
pub const INGRESS_V1BETA1_GROUP_VERSION: &str = "networking.k8s.io/v1beta1";
pub const INGRESS_KIND: &str = "Ingress";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read server version: {source}"))]
    Discovery { source: ApiError },

    #[snafu(display("can not parse server minor version '{minor}': {source}"))]
    ParseMinor {
        minor: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("server version is unknown"))]
    UnknownServerVersion,
}

/// One served group-version and the kinds it exposes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServedGroupVersion {
    pub group_version: String,
    pub kinds: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Every served group-version with its kinds. Groups that fail to list
    /// are left out rather than failing the whole call.
    async fn served_resources(&self) -> Result<Vec<ServedGroupVersion>, ApiError>;

    /// The raw `minor` field of the server version, e.g. `"27+"`.
    async fn server_minor(&self) -> Result<String, ApiError>;
}

pub struct KubeDiscovery {
    client: kube::Client,
}

impl KubeDiscovery {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    async fn kinds(&self, group_version: &str) -> Result<Vec<String>, ApiError> {
        let list = if group_version.contains('/') {
            self.client.list_api_group_resources(group_version).await?
        } else {
            self.client.list_core_api_resources(group_version).await?
        };
        Ok(list
            .resources
            .into_iter()
            // subresources such as pods/exec report the parent kind
            .filter(|r| !r.name.contains('/'))
            .map(|r| r.kind)
            .collect())
    }
}

#[async_trait]
impl Discovery for KubeDiscovery {
    async fn served_resources(&self) -> Result<Vec<ServedGroupVersion>, ApiError> {
        let mut group_versions = self.client.list_core_api_versions().await?.versions;
        for group in self.client.list_api_groups().await?.groups {
            group_versions.extend(group.versions.into_iter().map(|v| v.group_version));
        }

        let mut served = Vec::with_capacity(group_versions.len());
        for group_version in group_versions {
            match self.kinds(&group_version).await {
                Ok(kinds) => served.push(ServedGroupVersion {
                    group_version,
                    kinds,
                }),
                Err(error) => {
                    error!(%group_version, %error, "failed to list resources of api group");
                }
            }
        }
        Ok(served)
    }

    async fn server_minor(&self) -> Result<String, ApiError> {
        Ok(self.client.apiserver_version().await?.minor)
    }
}

/// Parses a minor version string, tolerating the trailing `+` some
/// distributions append.
pub fn parse_minor(minor: &str) -> Result<u32, Error> {
    minor
        .trim()
        .trim_end_matches('+')
        .parse::<u32>()
        .context(ParseMinorSnafu { minor })
}

/// Immutable answers for one reconcile tick.
#[derive(Clone, Debug, Default)]
pub struct CapabilitySnapshot {
    served: Vec<ServedGroupVersion>,
    minor: Option<String>,
}

impl CapabilitySnapshot {
    /// Runs discovery once. Failures are logged and leave the snapshot empty
    /// so every query answers `false`.
    pub async fn probe(discovery: &dyn Discovery) -> Self {
        let served = discovery.served_resources().await.unwrap_or_else(|error| {
            error!(%error, "failed to discover served api resources");
            Vec::new()
        });
        let minor = match discovery.server_minor().await {
            Ok(minor) => Some(minor),
            Err(error) => {
                error!(%error, "failed to get server version");
                None
            }
        };
        let snapshot = Self { served, minor };
        debug!(
            route = snapshot.has_route_api(),
            ingress_v1 = snapshot.has_ingress_v1(),
            ingress_v1beta1 = snapshot.has_ingress_v1beta1(),
            minor = ?snapshot.minor,
            "capabilities probed"
        );
        snapshot
    }

    pub fn from_parts(served: Vec<ServedGroupVersion>, minor: Option<&str>) -> Self {
        Self {
            served,
            minor: minor.map(str::to_owned),
        }
    }

    pub fn has_api(&self, group_version: &str, kind: &str) -> bool {
        self.served
            .iter()
            .filter(|gv| gv.group_version == group_version)
            .any(|gv| gv.kinds.iter().any(|k| k == kind))
    }

    pub fn has_route_api(&self) -> bool {
        self.has_api(ROUTE_GROUP_VERSION, ROUTE_KIND)
    }

    pub fn has_ingress_v1(&self) -> bool {
        self.has_api(INGRESS_V1_GROUP_VERSION, INGRESS_KIND)
    }

    pub fn has_ingress_v1beta1(&self) -> bool {
        self.has_api(INGRESS_V1BETA1_GROUP_VERSION, INGRESS_KIND)
    }

    pub fn server_minor_version(&self) -> Result<u32, Error> {
        match &self.minor {
            Some(minor) => parse_minor(minor),
            None => UnknownServerVersionSnafu.fail(),
        }
    }

    fn minor_or_zero(&self) -> u32 {
        self.server_minor_version().unwrap_or(0)
    }

    pub fn is_openshift_v4(&self) -> bool {
        self.has_route_api() && self.minor_or_zero() >= 18
    }

    pub fn is_openshift_v3(&self) -> bool {
        self.has_route_api() && self.minor_or_zero() == 11
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{openshift_v3, openshift_v4, vanilla};

    #[test]
    fn test_parse_minor() {
        assert_eq!(parse_minor("27").unwrap(), 27);
        assert_eq!(parse_minor("11+").unwrap(), 11);
        assert!(parse_minor("x").is_err());
    }

    #[test]
    fn test_platform_detection() {
        let k8s = vanilla("27");
        assert!(!k8s.has_route_api());
        assert!(!k8s.is_openshift_v4());
        assert!(!k8s.is_openshift_v3());
        assert!(k8s.has_ingress_v1());

        let os4 = openshift_v4();
        assert!(os4.has_route_api());
        assert!(os4.is_openshift_v4());
        assert!(!os4.is_openshift_v3());

        let os3 = openshift_v3();
        assert!(os3.is_openshift_v3());
        assert!(!os3.is_openshift_v4());
        assert!(os3.has_ingress_v1beta1());
        assert!(!os3.has_ingress_v1());
    }

    #[test]
    fn test_has_api_needs_exact_pair() {
        let snapshot = CapabilitySnapshot::from_parts(
            vec![ServedGroupVersion {
                group_version: "networking.k8s.io/v1".to_owned(),
                kinds: vec!["NetworkPolicy".to_owned()],
            }],
            Some("27"),
        );
        assert!(snapshot.has_api("networking.k8s.io/v1", "NetworkPolicy"));
        assert!(!snapshot.has_ingress_v1());
        assert!(!snapshot.has_api("networking.k8s.io/v1beta1", "NetworkPolicy"));
    }

    #[tokio::test]
    async fn test_probe_failures_answer_false() {
        let mut discovery = MockDiscovery::new();
        discovery
            .expect_served_resources()
            .returning(|| Err(ApiError::forbidden("discovery is forbidden")));
        discovery
            .expect_server_minor()
            .returning(|| Err(ApiError::status(500, "InternalError", "boom")));

        let snapshot = CapabilitySnapshot::probe(&discovery).await;
        assert!(!snapshot.has_route_api());
        assert!(!snapshot.is_openshift_v4());
        assert!(matches!(
            snapshot.server_minor_version(),
            Err(Error::UnknownServerVersion)
        ));
    }

    #[tokio::test]
    async fn test_probe_calls_discovery_once() {
        let mut discovery = MockDiscovery::new();
        discovery.expect_served_resources().times(1).returning(|| {
            Ok(vec![ServedGroupVersion {
                group_version: ROUTE_GROUP_VERSION.to_owned(),
                kinds: vec![ROUTE_KIND.to_owned()],
            }])
        });
        discovery
            .expect_server_minor()
            .times(1)
            .returning(|| Ok("27+".to_owned()));

        let snapshot = CapabilitySnapshot::probe(&discovery).await;
        assert!(snapshot.is_openshift_v4());
        assert!(snapshot.is_openshift_v4());
        assert_eq!(snapshot.server_minor_version().unwrap(), 27);
    }
}
