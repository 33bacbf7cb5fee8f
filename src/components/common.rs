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

use super::{ComponentContext, Error};
use crate::sync::{Desired, ObjectKey, fields};
use crate::types::v1alpha1::k8s::{Ingress, Monitor};
use crate::types::v1alpha1::platform_monitoring::PlatformMonitoring;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as networkingv1;
use k8s_openapi::api::rbac::v1 as rbacv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ApiResource, DynamicObject};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const PART_OF: &str = "monitoring";
pub const MANAGED_BY: &str = "monitoring-operator";

/// Resources of the operators this one drives.
pub mod api {
    use kube::api::ApiResource;
    use kube::core::GroupVersionKind;

    fn resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
        ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
    }

    pub fn service_monitor() -> ApiResource {
        resource("monitoring.coreos.com", "v1", "ServiceMonitor", "servicemonitors")
    }

    pub fn pod_monitor() -> ApiResource {
        resource("monitoring.coreos.com", "v1", "PodMonitor", "podmonitors")
    }

    pub fn victoriametrics(kind: &str, plural: &str) -> ApiResource {
        resource("operator.victoriametrics.com", "v1beta1", kind, plural)
    }

    pub fn grafana() -> ApiResource {
        resource("integreatly.org", "v1alpha1", "Grafana", "grafanas")
    }

    pub fn grafana_datasource() -> ApiResource {
        resource(
            "integreatly.org",
            "v1alpha1",
            "GrafanaDataSource",
            "grafanadatasources",
        )
    }

    pub fn ingress_v1beta1() -> ApiResource {
        resource("networking.k8s.io", "v1beta1", "Ingress", "ingresses")
    }
}

/// Tag part of an image reference, if any.
pub fn image_tag(image: &str) -> Option<&str> {
    let image = image.split('@').next().unwrap_or(image);
    let (_, tag) = image.rsplit_once(':')?;
    (!tag.is_empty() && !tag.contains('/')).then_some(tag)
}

/// `(repository, tag)` with `latest` as the implicit tag.
pub fn split_image(image: &str) -> (&str, &str) {
    match image_tag(image) {
        Some(tag) => (&image[..image.len() - tag.len() - 1], tag),
        None => (image, "latest"),
    }
}

pub fn standard_labels(
    cr: &PlatformMonitoring,
    name: &str,
    component: &str,
    image: Option<&str>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("name".to_owned(), name.to_owned()),
        ("app.kubernetes.io/name".to_owned(), name.to_owned()),
        ("app.kubernetes.io/instance".to_owned(), cr.instance_label(name)),
        ("app.kubernetes.io/component".to_owned(), component.to_owned()),
        ("app.kubernetes.io/part-of".to_owned(), PART_OF.to_owned()),
        ("app.kubernetes.io/managed-by".to_owned(), MANAGED_BY.to_owned()),
    ]);
    if let Some(tag) = image.and_then(image_tag) {
        labels.insert("app.kubernetes.io/version".to_owned(), tag.to_owned());
    }
    labels
}

/// Labels a workload's pods are selected by.
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_owned(), name.to_owned()),
        ("app.kubernetes.io/part-of".to_owned(), PART_OF.to_owned()),
    ])
}

pub fn object_meta(
    name: &str,
    namespace: Option<&str>,
    labels: BTreeMap<String, String>,
) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.to_owned()),
        namespace: namespace.map(str::to_owned),
        labels: Some(labels),
        ..Default::default()
    }
}

/// A third-party custom resource built from a JSON body (`spec`, `data`, ...).
pub fn custom(
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    labels: BTreeMap<String, String>,
    body: Value,
    managed: &'static [&'static str],
) -> Desired {
    let mut object = DynamicObject::new(name, resource).data(body);
    object.metadata.namespace = namespace.map(str::to_owned);
    object.metadata.labels = Some(labels);
    Desired::new(resource.clone(), object, managed)
}

pub fn key<K>(namespace: Option<&str>, name: &str) -> ObjectKey
where
    K: kube::Resource<DynamicType = ()>,
{
    ObjectKey::new(ApiResource::erase::<K>(&()), namespace, name)
}

pub fn custom_key(resource: ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey::new(resource, namespace, name)
}

pub fn service_account(
    ctx: &ComponentContext<'_>,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Desired, Error> {
    let sa = corev1::ServiceAccount {
        metadata: object_meta(name, Some(&ctx.namespace), labels.clone()),
        ..Default::default()
    };
    Ok(Desired::typed(&sa, fields::METADATA)?)
}

pub fn cluster_role(
    name: &str,
    labels: &BTreeMap<String, String>,
    rules: Vec<rbacv1::PolicyRule>,
) -> Result<Desired, Error> {
    let role = rbacv1::ClusterRole {
        metadata: object_meta(name, None, labels.clone()),
        rules: Some(rules),
        ..Default::default()
    };
    Ok(Desired::typed(&role, fields::ROLE)?.gated())
}

pub fn cluster_role_binding(
    ctx: &ComponentContext<'_>,
    name: &str,
    labels: &BTreeMap<String, String>,
    service_account: &str,
) -> Result<Desired, Error> {
    let binding = rbacv1::ClusterRoleBinding {
        metadata: object_meta(name, None, labels.clone()),
        role_ref: rbacv1::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_owned(),
            kind: "ClusterRole".to_owned(),
            name: name.to_owned(),
        },
        subjects: Some(vec![subject(ctx, service_account)]),
    };
    Ok(Desired::typed(&binding, fields::ROLE_BINDING)?.gated())
}

pub fn role(
    ctx: &ComponentContext<'_>,
    name: &str,
    labels: &BTreeMap<String, String>,
    rules: Vec<rbacv1::PolicyRule>,
) -> Result<Desired, Error> {
    let role = rbacv1::Role {
        metadata: object_meta(name, Some(&ctx.namespace), labels.clone()),
        rules: Some(rules),
    };
    Ok(Desired::typed(&role, fields::ROLE)?)
}

pub fn role_binding(
    ctx: &ComponentContext<'_>,
    name: &str,
    labels: &BTreeMap<String, String>,
    service_account: &str,
) -> Result<Desired, Error> {
    let binding = rbacv1::RoleBinding {
        metadata: object_meta(name, Some(&ctx.namespace), labels.clone()),
        role_ref: rbacv1::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_owned(),
            kind: "Role".to_owned(),
            name: name.to_owned(),
        },
        subjects: Some(vec![subject(ctx, service_account)]),
    };
    Ok(Desired::typed(&binding, fields::ROLE_BINDING)?)
}

fn subject(ctx: &ComponentContext<'_>, service_account: &str) -> rbacv1::Subject {
    rbacv1::Subject {
        kind: "ServiceAccount".to_owned(),
        name: service_account.to_owned(),
        namespace: Some(ctx.namespace.clone()),
        ..Default::default()
    }
}

pub fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> rbacv1::PolicyRule {
    let owned = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
    rbacv1::PolicyRule {
        api_groups: Some(owned(groups)),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..Default::default()
    }
}

pub fn service(
    ctx: &ComponentContext<'_>,
    name: &str,
    labels: &BTreeMap<String, String>,
    ports: Vec<(&str, i32)>,
    headless: bool,
) -> Result<Desired, Error> {
    let svc = corev1::Service {
        metadata: object_meta(name, Some(&ctx.namespace), labels.clone()),
        spec: Some(corev1::ServiceSpec {
            type_: Some("ClusterIP".to_owned()),
            cluster_ip: headless.then(|| "None".to_owned()),
            selector: Some(selector_labels(name)),
            ports: Some(
                ports
                    .into_iter()
                    .map(|(port_name, port)| corev1::ServicePort {
                        name: Some(port_name.to_owned()),
                        port,
                        target_port: Some(IntOrString::String(port_name.to_owned())),
                        protocol: Some("TCP".to_owned()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(Desired::typed(&svc, fields::SERVICE)?)
}

pub fn container_ports(ports: &[(&str, i32)]) -> Vec<corev1::ContainerPort> {
    ports
        .iter()
        .map(|(name, port)| corev1::ContainerPort {
            name: Some((*name).to_owned()),
            container_port: *port,
            protocol: Some("TCP".to_owned()),
            ..Default::default()
        })
        .collect()
}

/// Label selector matching [`selector_labels`].
pub fn label_selector(name: &str) -> metav1::LabelSelector {
    metav1::LabelSelector {
        match_labels: Some(selector_labels(name)),
        ..Default::default()
    }
}

/// Pod template labels: the object labels, which include the selector labels.
pub fn pod_meta(labels: &BTreeMap<String, String>) -> Option<metav1::ObjectMeta> {
    Some(metav1::ObjectMeta {
        labels: Some(labels.clone()),
        ..Default::default()
    })
}

fn apply_monitor(endpoint: &mut Value, monitor: &Monitor) {
    let Some(endpoint) = endpoint.as_object_mut() else {
        return;
    };
    if let Some(interval) = &monitor.interval {
        endpoint.insert("interval".to_owned(), json!(interval));
    }
    if let Some(timeout) = &monitor.scrape_timeout {
        endpoint.insert("scrapeTimeout".to_owned(), json!(timeout));
    }
}

fn monitor_labels(
    mut labels: BTreeMap<String, String>,
    monitor: &Monitor,
) -> BTreeMap<String, String> {
    labels.extend(monitor.labels.clone());
    labels
}

/// A prometheus-operator ServiceMonitor. `monitor` overrides interval,
/// scrape timeout and adds labels.
pub fn service_monitor(
    ctx: &ComponentContext<'_>,
    name: &str,
    labels: BTreeMap<String, String>,
    monitor: &Monitor,
    mut endpoints: Vec<Value>,
    selector: Value,
    namespaces: Option<&[&str]>,
) -> Desired {
    endpoints
        .iter_mut()
        .for_each(|endpoint| apply_monitor(endpoint, monitor));
    let namespace_selector = match namespaces {
        Some(names) => json!({ "matchNames": names }),
        None => json!({ "matchNames": [ctx.namespace] }),
    };
    custom(
        &api::service_monitor(),
        Some(&ctx.namespace),
        name,
        monitor_labels(labels, monitor),
        json!({
            "spec": {
                "endpoints": endpoints,
                "selector": selector,
                "namespaceSelector": namespace_selector,
            }
        }),
        fields::SPEC,
    )
}

pub fn pod_monitor(
    ctx: &ComponentContext<'_>,
    name: &str,
    labels: BTreeMap<String, String>,
    monitor: &Monitor,
    mut endpoints: Vec<Value>,
    selector: Value,
    namespace_selector: Value,
) -> Desired {
    endpoints
        .iter_mut()
        .for_each(|endpoint| apply_monitor(endpoint, monitor));
    custom(
        &api::pod_monitor(),
        Some(&ctx.namespace),
        name,
        monitor_labels(labels, monitor),
        json!({
            "spec": {
                "podMetricsEndpoints": endpoints,
                "selector": selector,
                "namespaceSelector": namespace_selector,
            }
        }),
        fields::SPEC,
    )
}

pub fn service_monitor_key(ctx: &ComponentContext<'_>, name: &str) -> ObjectKey {
    custom_key(api::service_monitor(), Some(&ctx.namespace), name)
}

pub fn pod_monitor_key(ctx: &ComponentContext<'_>, name: &str) -> ObjectKey {
    custom_key(api::pod_monitor(), Some(&ctx.namespace), name)
}

/// Backend of an exposed component.
pub struct Backend<'a> {
    pub component: &'a str,
    pub service: &'a str,
    pub port: i32,
}

/// Ingress objects for a component: v1 when served, otherwise v1beta1.
fn ingress_objects(
    ctx: &ComponentContext<'_>,
    ingress: &Ingress,
    backend: &Backend<'_>,
) -> Result<Vec<Desired>, Error> {
    let host = ingress.host(backend.component)?;
    let name = ctx.prefixed(backend.component);
    let mut labels = ctx.labels(&name, backend.component, None);
    labels.extend(ingress.labels.clone());
    let annotations = (!ingress.annotations.is_empty()).then(|| ingress.annotations.clone());

    if ctx.caps.has_ingress_v1() || !ctx.caps.has_ingress_v1beta1() {
        let mut meta = object_meta(&name, Some(&ctx.namespace), labels);
        meta.annotations = annotations;
        let object = networkingv1::Ingress {
            metadata: meta,
            spec: Some(networkingv1::IngressSpec {
                ingress_class_name: ingress.ingress_class_name.clone(),
                rules: Some(vec![networkingv1::IngressRule {
                    host: Some(host.to_owned()),
                    http: Some(networkingv1::HTTPIngressRuleValue {
                        paths: vec![networkingv1::HTTPIngressPath {
                            path: Some("/".to_owned()),
                            path_type: "Prefix".to_owned(),
                            backend: networkingv1::IngressBackend {
                                service: Some(networkingv1::IngressServiceBackend {
                                    name: backend.service.to_owned(),
                                    port: Some(networkingv1::ServiceBackendPort {
                                        number: Some(backend.port),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                tls: ingress.tls_secret_name.as_ref().map(|secret| {
                    vec![networkingv1::IngressTLS {
                        hosts: Some(vec![host.to_owned()]),
                        secret_name: Some(secret.clone()),
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        return Ok(vec![Desired::typed(&object, fields::INGRESS)?]);
    }

    let mut spec = json!({
        "rules": [{
            "host": host,
            "http": {"paths": [{
                "path": "/",
                "backend": {"serviceName": backend.service, "servicePort": backend.port},
            }]},
        }],
    });
    if let Some(secret) = &ingress.tls_secret_name {
        spec["tls"] = json!([{ "hosts": [host], "secretName": secret }]);
    }
    if let Some(class) = &ingress.ingress_class_name {
        spec["ingressClassName"] = json!(class);
    }
    let mut desired = custom(
        &api::ingress_v1beta1(),
        Some(&ctx.namespace),
        &name,
        labels,
        json!({ "spec": spec }),
        fields::INGRESS,
    );
    desired.object.metadata.annotations = annotations;
    Ok(vec![desired])
}

pub fn ingress_keys(ctx: &ComponentContext<'_>, component: &str) -> Vec<ObjectKey> {
    let name = ctx.prefixed(component);
    let mut keys = Vec::new();
    if ctx.caps.has_ingress_v1() {
        keys.push(key::<networkingv1::Ingress>(Some(&ctx.namespace), &name));
    }
    if ctx.caps.has_ingress_v1beta1() {
        keys.push(custom_key(
            api::ingress_v1beta1(),
            Some(&ctx.namespace),
            &name,
        ));
    }
    keys
}

/// Creates the ingress when requested and removes it otherwise.
pub async fn converge_ingress(
    ctx: &ComponentContext<'_>,
    ingress: Option<&Ingress>,
    backend: Backend<'_>,
) -> Result<(), Error> {
    match ingress.filter(|i| i.is_install()) {
        Some(ingress) => ctx.apply_all(ingress_objects(ctx, ingress, &backend)?).await,
        None => {
            ctx.remove_all(ingress_keys(ctx, backend.component)).await;
            Ok(())
        }
    }
}
