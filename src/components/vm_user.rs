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

//! The VMUser routing authenticated requests through vmauth.

use super::common::{self, api};
use super::vm_single::VM_COMPONENT_NAME;
use super::{Component, ComponentContext, Error, Outcome};
use crate::sync::fields;
use crate::types::v1alpha1::victoriametrics::VmUser as Spec;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

const NAME: &str = "vmuser";
const DEFAULT_USERNAME: &str = "admin";
const PASSWORD_KEY: &str = "password";

pub struct VmUser;

fn target(kind: &str, namespace: &str, paths: &[&str]) -> Value {
    json!({
        "crd": {"kind": kind, "name": VM_COMPONENT_NAME, "namespace": namespace},
        "paths": paths,
    })
}

fn body(ctx: &ComponentContext<'_>, spec: &Spec) -> Value {
    let ns = ctx.namespace.as_str();
    let mut targets = Vec::new();
    if ctx.cr.vm_single_installed() {
        targets.push(target("VMSingle", ns, &["/vmui.*", "/api/v1/.*", "/prometheus/.*"]));
    }
    if ctx.cr.vm_alert_manager_installed() {
        targets.push(target("VMAlertmanager", ns, &["/api/v2/alerts.*", "/alertmanager/.*"]));
    }

    let mut body = json!({
        "username": spec.username.as_deref().unwrap_or(DEFAULT_USERNAME),
        "targetRefs": targets,
    });
    if let Some(secret) = &spec.password_secret {
        body["passwordRef"] = json!({"name": secret, "key": PASSWORD_KEY});
    } else {
        body["generatePassword"] = json!(true);
    }
    json!({ "spec": body })
}

#[async_trait]
impl Component for VmUser {
    fn name(&self) -> &'static str {
        "vmuser"
    }

    fn display_name(&self) -> &'static str {
        "VictoriaMetrics user"
    }

    fn reason(&self) -> Option<&'static str> {
        Some("ReconcileVictoriametricsUserStatus")
    }

    async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, Error> {
        let resource = api::victoriametrics("VMUser", "vmusers");
        let spec = match ctx.cr.vm_user() {
            Some(spec) if spec.paused => {
                info!("vmuser is paused");
                return Ok(Outcome::default());
            }
            Some(spec) if spec.is_install() && ctx.cr.vm_auth_installed() => spec,
            _ => {
                ctx.remove_all(vec![common::custom_key(
                    resource,
                    Some(&ctx.namespace),
                    NAME,
                )])
                .await;
                return Ok(Outcome::default());
            }
        };

        let labels = ctx.labels(NAME, "victoriametrics", None);
        ctx.sync
            .ensure(common::custom(
                &resource,
                Some(&ctx.namespace),
                NAME,
                labels,
                body(ctx, spec),
                fields::SPEC,
            ))
            .await?;
        Ok(Outcome::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{Harness, platform_monitoring, vanilla};
    use crate::types::v1alpha1::victoriametrics::{Victoriametrics, VmAuth, VmSingle};

    fn cr(with_auth: bool) -> crate::types::v1alpha1::platform_monitoring::PlatformMonitoring {
        let mut cr = platform_monitoring();
        cr.spec.victoriametrics = Some(Victoriametrics {
            vm_single: Some(VmSingle {
                image: "victoriametrics/victoria-metrics:v1.101.0".to_owned(),
                ..Default::default()
            }),
            vm_auth: with_auth.then(|| VmAuth {
                image: "victoriametrics/vmauth:v1.101.0".to_owned(),
                ..Default::default()
            }),
            vm_user: Some(Spec {
                password_secret: Some("vmuser-password".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        });
        cr
    }

    #[tokio::test]
    async fn test_user_routes_to_vmsingle() {
        let harness = Harness::new(cr(true), vanilla("30"));
        harness.run(&VmUser).await.unwrap();

        let user = harness
            .custom(api::victoriametrics("VMUser", "vmusers"), NAME)
            .unwrap();
        let spec = &user.data["spec"];
        assert_eq!(spec["username"], "admin");
        assert_eq!(spec["passwordRef"]["name"], "vmuser-password");
        assert_eq!(spec["targetRefs"][0]["crd"]["kind"], "VMSingle");
        assert_eq!(spec["targetRefs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_user_needs_vmauth() {
        let harness = Harness::new(cr(false), vanilla("30"));
        harness.run(&VmUser).await.unwrap();
        assert!(harness
            .custom(api::victoriametrics("VMUser", "vmusers"), NAME)
            .is_none());
    }
}
