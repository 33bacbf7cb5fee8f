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

//! One reconcile tick: probe the platform, run every component in order and
//! fold the results into the CR status.

use crate::capability::CapabilitySnapshot;
use crate::components::{self, Component, ComponentContext};
use crate::conditions::ConditionStore;
use crate::context::Context;
use crate::types::v1alpha1::platform_monitoring::PlatformMonitoring;
use crate::types::v1alpha1::status::{ConditionStatus, ConditionType};
use crate::{config, context, types};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use snafu::Snafu;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const CYCLE_REASON: &str = "ReconcileCycleStatus";
const CYCLE_IN_PROGRESS: &str = "Monitoring service reconcile cycle in progress";
const CYCLE_FAILED: &str = "Monitoring service reconcile cycle failed";
const CYCLE_SUCCEEDED: &str = "Monitoring service reconcile cycle succeeded";

/// Requeue after a tick with failed components.
const FAILED_TICK_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Config { source: config::Error },
}

impl Error {
    /// The CR vanished while the tick was running.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Context {
                source: context::Error::Status { source, .. },
            } => source.is_not_found(),
            Error::Context {
                source: context::Error::Sync { source },
            } => source.is_not_found(),
            _ => false,
        }
    }
}

pub async fn reconcile_monitoring(
    cr: Arc<PlatformMonitoring>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let ns = cr.namespace()?;
    let Some(latest) = ctx.get(&cr.name(), &ns).await? else {
        debug!(name = %cr.name(), namespace = %ns, "platform monitoring is gone");
        return Ok(Action::await_change());
    };

    if latest.metadata.deletion_timestamp.is_some() {
        debug!(
            "platform monitoring {} is deleted, deletion_timestamp is {:?}",
            cr.name(),
            latest.metadata.deletion_timestamp
        );
        return Ok(Action::await_change());
    }

    let cancel = CancellationToken::new();
    let watchdog = {
        let cancel = cancel.clone();
        let timeout = ctx.config.tick_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(?timeout, "reconcile tick deadline reached, cancelling");
            cancel.cancel();
        })
    };

    let result = tick(&ctx, latest, cancel).await;
    watchdog.abort();
    result
}

async fn tick(
    ctx: &Context,
    latest: PlatformMonitoring,
    cancel: CancellationToken,
) -> Result<Action, Error> {
    let mut working = latest.clone();
    working.fill_empty_with_defaults();

    let caps = CapabilitySnapshot::probe(ctx.discovery.as_ref()).await;

    let mut conditions = ConditionStore::from_status(latest.status.as_ref());
    let mut latest = latest;
    if conditions.set(
        CYCLE_REASON,
        ConditionType::InProgress,
        ConditionStatus::False,
        CYCLE_IN_PROGRESS,
    ) {
        latest = write_status(ctx, latest, &conditions).await;
    }

    let component_ctx = ComponentContext::new(
        &working,
        &caps,
        ctx.store.as_ref(),
        ctx.pods.as_ref(),
        ctx.config.privileged,
        cancel,
    )?;
    run_components(&component_ctx, &components::all(), &mut conditions).await;

    let interval = ctx.config.reconciliation_interval()?;

    let (type_, status, message, event_type, action) = if conditions.has_any_failure() {
        (
            ConditionType::Failed,
            ConditionStatus::False,
            CYCLE_FAILED,
            EventType::Warning,
            Action::requeue(FAILED_TICK_REQUEUE),
        )
    } else {
        (
            ConditionType::Successful,
            ConditionStatus::True,
            CYCLE_SUCCEEDED,
            EventType::Normal,
            Action::requeue(interval),
        )
    };
    conditions.set(CYCLE_REASON, type_, status, message);
    let latest = write_status(ctx, latest, &conditions).await;

    if let Err(error) = ctx.record(&latest, event_type, CYCLE_REASON, message).await {
        warn!(%error, "failed to record reconcile event");
    }
    info!(name = %latest.name(), outcome = message, "reconcile tick finished");
    Ok(action)
}

/// Status write failures are logged only; the next tick writes again.
async fn write_status(
    ctx: &Context,
    cr: PlatformMonitoring,
    conditions: &ConditionStore,
) -> PlatformMonitoring {
    match ctx.update_status(&cr, conditions.to_status()).await {
        Ok(written) => written,
        Err(error) => {
            error!(%error, "failed to update platform monitoring status");
            cr
        }
    }
}

/// Runs each component once. A failure becomes a `Failed` condition under
/// the component's reason, a success clears it.
pub(crate) async fn run_components(
    ctx: &ComponentContext<'_>,
    components: &[Box<dyn Component>],
    conditions: &mut ConditionStore,
) {
    for component in components {
        debug!(component = component.name(), "reconciling");
        let result = match component.reconcile(ctx).await {
            Ok(outcome) if outcome.admin_credentials_changed => {
                info!(component = component.name(), "admin credentials not applied yet");
                components::reset_admin_credentials(ctx).await
            }
            Ok(_) => Ok(()),
            Err(error) => Err(error),
        };

        match (result, component.reason()) {
            (Ok(()), Some(reason)) => {
                conditions.remove(reason);
            }
            (Ok(()), None) => {}
            (Err(error), Some(reason)) => {
                error!(component = component.name(), %error, "reconcile failed");
                conditions.set(
                    reason,
                    ConditionType::Failed,
                    ConditionStatus::False,
                    &format!("{} reconcile cycle failed", component.display_name()),
                );
            }
            (Err(error), None) => {
                error!(component = component.name(), %error, "reconcile failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capability::{
        INGRESS_KIND, INGRESS_V1_GROUP_VERSION, MockDiscovery, ServedGroupVersion,
    };
    use crate::certs::MockPodCommands;
    use crate::components::common::api;
    use crate::components::{Error as ComponentError, Outcome};
    use crate::config::OperatorConfig;
    use crate::context::MockEventSink;
    use crate::sync::{Desired, ObjectKey, fields};
    use crate::tests::{Harness, MemoryStore, platform_monitoring, vanilla};
    use crate::types::v1alpha1::grafana::Grafana;
    use crate::types::v1alpha1::k8s::Ingress;
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1 as appsv1;
    use k8s_openapi::api::core::v1 as corev1;
    use k8s_openapi::api::networking::v1 as networkingv1;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

    /// Creates one ConfigMap named after itself, or fails.
    struct Fake {
        name: &'static str,
        reason: Option<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl Component for Fake {
        fn name(&self) -> &'static str {
            self.name
        }

        fn display_name(&self) -> &'static str {
            self.name
        }

        fn reason(&self) -> Option<&'static str> {
            self.reason
        }

        async fn reconcile(&self, ctx: &ComponentContext<'_>) -> Result<Outcome, ComponentError> {
            if self.fail {
                return Err(ComponentError::NoRunningPod {
                    selector: "app=missing".to_owned(),
                });
            }
            let cm = corev1::ConfigMap {
                metadata: metav1::ObjectMeta {
                    name: Some(self.name.to_owned()),
                    namespace: Some(ctx.namespace.clone()),
                    ..Default::default()
                },
                ..Default::default()
            };
            ctx.sync.ensure(Desired::typed(&cm, fields::DATA)?).await?;
            Ok(Outcome::default())
        }
    }

    fn fake(name: &'static str, reason: Option<&'static str>, fail: bool) -> Box<dyn Component> {
        Box::new(Fake { name, reason, fail })
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let harness = Harness::new(platform_monitoring(), vanilla("30"));
        let cr = harness.cr();
        let ctx = harness.context(&cr);
        let mut conditions = ConditionStore::default();
        conditions.set("ReconcileA", ConditionType::Failed, ConditionStatus::False, "old");

        let components = vec![
            fake("a", Some("ReconcileA"), false),
            fake("b", Some("ReconcileB"), true),
            fake("c", Some("ReconcileC"), false),
        ];
        run_components(&ctx, &components, &mut conditions).await;

        assert!(harness.get::<corev1::ConfigMap>("a").is_some());
        assert!(harness.get::<corev1::ConfigMap>("c").is_some());
        assert_eq!(conditions.conditions().len(), 1);
        let failed = conditions.get("ReconcileB").unwrap();
        assert_eq!(failed.type_, "Failed");
        assert_eq!(failed.message, "b reconcile cycle failed");
    }

    #[tokio::test]
    async fn test_failure_without_reason_is_only_logged() {
        let harness = Harness::new(platform_monitoring(), vanilla("30"));
        let cr = harness.cr();
        let ctx = harness.context(&cr);
        let mut conditions = ConditionStore::default();

        run_components(&ctx, &[fake("monitors", None, true)], &mut conditions).await;
        assert!(!conditions.has_any_failure());
    }

    fn discovery() -> MockDiscovery {
        let mut discovery = MockDiscovery::new();
        discovery.expect_served_resources().returning(|| {
            Ok(vec![ServedGroupVersion {
                group_version: INGRESS_V1_GROUP_VERSION.to_owned(),
                kinds: vec![INGRESS_KIND.to_owned()],
            }])
        });
        discovery
            .expect_server_minor()
            .returning(|| Ok("30".to_owned()));
        discovery
    }

    fn context(store: Arc<MemoryStore>, events: MockEventSink) -> Arc<Context> {
        Arc::new(Context::from_parts(
            OperatorConfig::default(),
            store,
            Arc::new(discovery()),
            Arc::new(MockPodCommands::new()),
            Arc::new(events),
        ))
    }

    fn expect_event(type_: EventType) -> MockEventSink {
        let mut events = MockEventSink::new();
        events
            .expect_record()
            .withf(move |_, t, reason, _| *t == type_ && reason == CYCLE_REASON)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        events
    }

    #[tokio::test]
    async fn test_grafana_only_tick() {
        let mut cr = platform_monitoring();
        cr.spec.grafana = Some(Grafana {
            ingress: Some(Ingress {
                host: "grafana.example.com".to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::default());
        store.insert_typed(&cr);
        let ctx = context(store.clone(), expect_event(EventType::Normal));

        let action = reconcile_monitoring(Arc::new(cr), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(120)));

        let grafana = ObjectKey::new(api::grafana(), Some("monitoring"), "grafana");
        assert!(store.object(&grafana).is_some());
        let ingress = store
            .get_typed::<networkingv1::Ingress>(Some("monitoring"), "monitoring-grafana")
            .unwrap();
        assert_eq!(
            ingress.spec.unwrap().rules.unwrap()[0].host.as_deref(),
            Some("grafana.example.com")
        );

        let vmsingle = ObjectKey::new(
            api::victoriametrics("VMSingle", "vmsingles"),
            Some("monitoring"),
            "k8s",
        );
        assert!(store.object(&vmsingle).is_none());
        assert!(store
            .get_typed::<appsv1::Deployment>(Some("monitoring"), "kube-state-metrics")
            .is_none());
        assert!(store
            .get_typed::<appsv1::DaemonSet>(Some("monitoring"), "node-exporter")
            .is_none());

        let stored = store
            .get_typed::<PlatformMonitoring>(Some("monitoring"), "platformmonitoring")
            .unwrap();
        let conditions = stored.status.unwrap().conditions;
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, CYCLE_REASON);
        assert_eq!(conditions[0].type_, "Successful");
        assert_eq!(conditions[0].message, CYCLE_SUCCEEDED);
    }

    #[tokio::test]
    async fn test_failed_component_fails_cycle() {
        let mut cr = platform_monitoring();
        cr.spec.grafana = Some(Grafana {
            ingress: Some(Ingress {
                install: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::default());
        store.insert_typed(&cr);
        let ctx = context(store.clone(), expect_event(EventType::Warning));

        let action = reconcile_monitoring(Arc::new(cr), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(FAILED_TICK_REQUEUE));

        let stored = store
            .get_typed::<PlatformMonitoring>(Some("monitoring"), "platformmonitoring")
            .unwrap();
        let status = stored.status.unwrap();
        let grafana = status
            .conditions
            .iter()
            .find(|c| c.reason == "ReconcileGrafanaStatus")
            .unwrap();
        assert_eq!(grafana.message, "Grafana reconcile cycle failed");
        let cycle = status
            .conditions
            .iter()
            .find(|c| c.reason == CYCLE_REASON)
            .unwrap();
        assert_eq!(cycle.type_, "Failed");
    }

    #[tokio::test]
    async fn test_missing_cr_awaits_change() {
        let store = Arc::new(MemoryStore::default());
        let ctx = context(store, MockEventSink::new());

        let action = reconcile_monitoring(Arc::new(platform_monitoring()), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_bad_interval_aborts_tick() {
        let cr = platform_monitoring();
        let store = Arc::new(MemoryStore::default());
        store.insert_typed(&cr);
        let ctx = Arc::new(Context::from_parts(
            OperatorConfig {
                reconciliation_interval: "2m".to_owned(),
                ..Default::default()
            },
            store,
            Arc::new(discovery()),
            Arc::new(MockPodCommands::new()),
            Arc::new(MockEventSink::new()),
        ));

        let err = reconcile_monitoring(Arc::new(cr), ctx).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
