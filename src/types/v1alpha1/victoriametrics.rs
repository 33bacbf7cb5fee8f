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

//! Victoriametrics sections of the PlatformMonitoring spec.
//!
//! Images are never defaulted here: a section without an image stays
//! uninstalled even if `install` is unset.

use crate::types::error::{ConflictingOptionsSnafu, Error};
use crate::types::v1alpha1::k8s::{Ingress, Monitor};
use k8s_openapi::api::core::v1 as corev1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn image_install(install: Option<bool>, image: &str) -> bool {
    install.unwrap_or(true) && !image.is_empty()
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Victoriametrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_operator: Option<VmOperator>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_single: Option<VmSingle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_agent: Option<VmAgent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_alert_manager: Option<VmAlertManager>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_alert: Option<VmAlert>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_auth: Option<VmAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_user: Option<VmUser>,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmOperator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<Monitor>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<corev1::Toleration>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl VmOperator {
    pub fn is_install(&self) -> bool {
        image_install(self.install, &self.image)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmSingle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    /// e.g. `14d`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<corev1::PersistentVolumeClaimSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

impl VmSingle {
    pub fn is_install(&self) -> bool {
        image_install(self.install, &self.image)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteWrite {
    pub url: String,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmAgent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_interval: Option<String>,

    /// Extra remote write targets. The local VMSingle, when installed, is
    /// always written to first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_write: Vec<RemoteWrite>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

impl VmAgent {
    pub fn is_install(&self) -> bool {
        image_install(self.install, &self.image)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmAlertManager {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Inline alertmanager configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_raw_yaml: Option<String>,

    /// Name of a user managed Secret holding the configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

impl VmAlertManager {
    pub fn is_install(&self) -> bool {
        image_install(self.install, &self.image)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.config_raw_yaml.is_some() && self.config_secret.is_some() {
            return ConflictingOptionsSnafu {
                component: "vmalertmanager",
                first: "configRawYaml",
                second: "configSecret",
            }
            .fail();
        }
        Ok(())
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmAlert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

impl VmAlert {
    pub fn is_install(&self) -> bool {
        image_install(self.install, &self.image)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

impl VmAuth {
    pub fn is_install(&self) -> bool {
        image_install(self.install, &self.image)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Secret holding the `password` key for the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret: Option<String>,
}

impl VmUser {
    pub fn is_install(&self) -> bool {
        self.install.unwrap_or(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_components_need_an_image() {
        let single = VmSingle::default();
        assert!(!single.is_install());

        let single = VmSingle {
            image: "victoriametrics/victoria-metrics:v1.101.0".to_owned(),
            ..Default::default()
        };
        assert!(single.is_install());

        let single = VmSingle {
            install: Some(false),
            ..single
        };
        assert!(!single.is_install());
    }

    #[test]
    fn test_vm_user_installs_by_default() {
        assert!(VmUser::default().is_install());
    }

    #[test]
    fn test_alertmanager_rejects_both_config_sources() {
        let am = VmAlertManager {
            config_raw_yaml: Some("route: {}".to_owned()),
            config_secret: Some("my-config".to_owned()),
            ..Default::default()
        };
        let err = am.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "vmalertmanager: 'configRawYaml' and 'configSecret' can not be set at the same time"
        );

        let am = VmAlertManager {
            config_secret: None,
            ..am
        };
        assert!(am.validate().is_ok());
    }
}
