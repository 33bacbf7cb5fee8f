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

//! etcd client certificates for the etcd ServiceMonitor.
//!
//! On OpenShift v4 the triplet is published by the etcd operator in a
//! ConfigMap and a Secret. Everywhere else it is read out of a running etcd
//! pod with a shell command and split back into its parts.

pub mod exec;
mod pem;

pub use exec::{ExecOutput, KubePodCommands, PodCommands};
#[cfg(test)]
pub use exec::MockPodCommands;
pub use pem::extract_bundle;

use crate::client::ApiError;
use crate::sync::{self, Desired, ObjectKey, ObjectStore, Synchronizer};
use crate::utils::tls;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::ApiResource;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const ETCD_SECRET_NAME: &str = "kube-etcd-client-certs";
pub const SECRET_CA_KEY: &str = "etcd-client-ca.crt";
pub const SECRET_CERT_KEY: &str = "etcd-client.crt";
pub const SECRET_KEY_KEY: &str = "etcd-client.key";

pub const ETCD_NAMESPACE: &str = "kube-system";
pub const ETCD_NAMESPACE_OPENSHIFT_V4: &str = "openshift-etcd";
pub const ETCD_POD_SELECTOR: &str = "component=etcd";
pub const ETCD_CONTAINER: &str = "etcd";

pub const OPENSHIFT_V4_SOURCE_NAMESPACE: &str = "openshift-etcd-operator";
pub const OPENSHIFT_V4_SOURCE_CONFIGMAP: &str = "etcd-metric-serving-ca";
pub const OPENSHIFT_V4_SOURCE_SECRET: &str = "etcd-metric-client";

const KUBERNETES_PEER_KEY: &str = "/etc/kubernetes/pki/etcd/peer.key";
const KUBERNETES_CA_CRT: &str = "/etc/kubernetes/pki/etcd/ca.crt";
const KUBERNETES_PEER_CRT: &str = "/etc/kubernetes/pki/etcd/peer.crt";
const OPENSHIFT_PEER_KEY: &str = "/etc/etcd/peer.key";
const OPENSHIFT_CA_CRT: &str = "/etc/etcd/ca.crt";
const OPENSHIFT_PEER_CRT: &str = "/etc/etcd/peer.crt";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to read {what}: {source}"))]
    Read { what: String, source: sync::Error },

    #[snafu(display("{what} not found"))]
    MissingSource { what: String },

    #[snafu(display("failed to retrieve etcd pods: {source}"))]
    ListPods { source: ApiError },

    #[snafu(display("failed to find etcd pods among pods to get etcd certificates"))]
    NoEtcdPods,

    #[snafu(display("failed to execute command in etcd pod"))]
    EmptyOutput,

    #[snafu(display("etcd certificate retrieval cancelled"))]
    Cancelled,

    #[snafu(display("failed to get certificate: bad certificates content"))]
    BadContent,

    #[snafu(display("{what} is empty"))]
    Empty { what: String },

    #[snafu(display("{what} has no PEM header"))]
    MissingHeader { what: String },

    #[snafu(display("{what} is not valid: {source}"))]
    Invalid { what: String, source: tls::Error },

    #[snafu(display("failed to read file {path}: {source}"))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("secret {name} does not exist"))]
    MissingSecret { name: String },

    #[snafu(display("failed to store certificates: {source}"))]
    Persist { source: sync::Error },
}

impl Error {
    pub fn is_forbidden(&self) -> bool {
        match self {
            Error::Read { source, .. } | Error::Persist { source } => source.is_forbidden(),
            Error::ListPods { source } => source.is_forbidden(),
            _ => false,
        }
    }
}

/// CA, client certificate and client key in PEM form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CertificateBundle {
    pub ca: String,
    pub cert: String,
    pub key: String,
}

fn check_certificate(what: &str, text: &str) -> Result<(), Error> {
    match (text.find(pem::BEGIN_CERTIFICATE), text.find(pem::END_CERTIFICATE)) {
        (Some(begin), Some(end)) if begin < end => Ok(()),
        _ => MissingHeaderSnafu { what }.fail(),
    }
}

impl CertificateBundle {
    /// Structural checks followed by a full PEM decode of every part.
    pub fn verify(&self) -> Result<(), Error> {
        for (what, value) in [("ca", &self.ca), ("cert", &self.cert), ("key", &self.key)] {
            if value.trim().is_empty() {
                return EmptySnafu { what }.fail();
            }
        }

        if !self.key.contains(pem::BEGIN_PRIVATE_KEY) && !self.key.contains(pem::BEGIN_RSA_PRIVATE_KEY)
        {
            return MissingHeaderSnafu { what: "key" }.fail();
        }
        check_certificate("ca", &self.ca)?;
        check_certificate("cert", &self.cert)?;

        tls::load_certs(self.ca.as_bytes()).context(InvalidSnafu { what: "ca" })?;
        tls::x509_key_pair(self.cert.as_bytes(), self.key.as_bytes())
            .context(InvalidSnafu { what: "cert/key pair" })?;
        Ok(())
    }

    pub fn secret_data(&self) -> BTreeMap<String, ByteString> {
        [
            (SECRET_CA_KEY, &self.ca),
            (SECRET_CERT_KEY, &self.cert),
            (SECRET_KEY_KEY, &self.key),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), ByteString(v.as_bytes().to_vec())))
        .collect()
    }
}

/// Files holding the peer key, CA and peer certificate, in that order.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerFiles {
    pub key: String,
    pub ca: String,
    pub cert: String,
}

impl PeerFiles {
    pub fn openshift() -> Self {
        Self {
            key: OPENSHIFT_PEER_KEY.to_owned(),
            ca: OPENSHIFT_CA_CRT.to_owned(),
            cert: OPENSHIFT_PEER_CRT.to_owned(),
        }
    }

    /// Kubernetes defaults overridden by the `etcd` container's flags.
    pub fn from_pod(pod: &corev1::Pod) -> Self {
        let mut files = Self {
            key: KUBERNETES_PEER_KEY.to_owned(),
            ca: KUBERNETES_CA_CRT.to_owned(),
            cert: KUBERNETES_PEER_CRT.to_owned(),
        };

        let args = pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .filter(|c| c.name == ETCD_CONTAINER)
            .flat_map(|c| c.command.iter().flatten());
        for arg in args {
            let Some((flag, value)) = arg.split_once('=') else {
                continue;
            };
            match flag {
                "--peer-key-file" => files.key = value.to_owned(),
                "--peer-trusted-ca-file" => files.ca = value.to_owned(),
                "--peer-cert-file" => files.cert = value.to_owned(),
                _ => {}
            }
        }
        files
    }

    /// Shell command printing key, CA and certificate one after the other.
    ///
    /// Newer images print the files with `echo "$(<file)"` so every part ends
    /// with a newline; older ones and OpenShift still get `cat`.
    pub fn read_command(&self, openshift: bool, minor: u32) -> Vec<String> {
        let command = if !openshift && minor >= 19 {
            format!(
                "echo \"$(<{})\";echo \"$(<{})\";echo \"$(<{})\"",
                self.key, self.ca, self.cert
            )
        } else {
            format!("cat {} {} {}", self.key, self.ca, self.cert)
        };
        vec!["/bin/sh".to_owned(), "-c".to_owned(), command]
    }
}

async fn running_etcd_pods(pods: &dyn PodCommands) -> Result<Vec<corev1::Pod>, Error> {
    let listed = pods
        .list_pods(ETCD_NAMESPACE, ETCD_POD_SELECTOR)
        .await
        .context(ListPodsSnafu)?;
    let running: Vec<_> = listed.into_iter().filter(exec::is_running).collect();
    if running.is_empty() {
        return NoEtcdPodsSnafu.fail();
    }
    Ok(running)
}

fn peer_files(running: &[corev1::Pod], openshift: bool) -> PeerFiles {
    match running.last() {
        Some(pod) if !openshift => PeerFiles::from_pod(pod),
        _ => PeerFiles::openshift(),
    }
}

/// Reads the triplet out of a running etcd pod. Each running pod is tried in
/// turn until one answers.
pub async fn from_pods(
    pods: &dyn PodCommands,
    openshift: bool,
    minor: u32,
    cancel: &CancellationToken,
) -> Result<CertificateBundle, Error> {
    let running = running_etcd_pods(pods).await?;
    let command = peer_files(&running, openshift).read_command(openshift, minor);

    let mut stdout = String::new();
    for name in exec::running_pod_names(&running) {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CancelledSnafu.fail(),
            attempt = pods.exec(ETCD_NAMESPACE, &name, ETCD_CONTAINER, command.clone()) => attempt,
        };
        match attempt {
            Ok(output) if !output.stdout.is_empty() => {
                info!(pod = %name, namespace = ETCD_NAMESPACE, "read etcd certificates from pod");
                stdout = output.stdout;
                break;
            }
            Ok(output) => {
                warn!(pod = %name, stderr = %output.stderr, "etcd pod returned no certificates, trying another pod");
            }
            Err(error) => {
                warn!(pod = %name, %error, "failed to exec in etcd pod, trying another pod");
            }
        }
    }

    if stdout.is_empty() {
        return EmptyOutputSnafu.fail();
    }
    extract_bundle(&stdout)
}

/// Reads the triplet from files on the local filesystem, for a process that
/// runs on a control plane node with the etcd directory mounted.
pub async fn from_host_files(
    pods: &dyn PodCommands,
    openshift: bool,
) -> Result<CertificateBundle, Error> {
    let files = if openshift {
        PeerFiles::openshift()
    } else {
        peer_files(&running_etcd_pods(pods).await?, false)
    };
    info!(key = %files.key, ca = %files.ca, cert = %files.cert, "reading etcd certificates from host");

    async fn read(path: &str) -> Result<String, Error> {
        tokio::fs::read_to_string(path)
            .await
            .context(ReadFileSnafu { path })
    }

    Ok(CertificateBundle {
        key: read(&files.key).await?,
        ca: read(&files.ca).await?,
        cert: read(&files.cert).await?,
    })
}

/// OpenShift v4 publishes the triplet through the etcd operator.
pub async fn from_openshift_sources(store: &dyn ObjectStore) -> Result<CertificateBundle, Error> {
    let config_map: corev1::ConfigMap = fetch(
        store,
        OPENSHIFT_V4_SOURCE_NAMESPACE,
        OPENSHIFT_V4_SOURCE_CONFIGMAP,
    )
    .await?;
    let secret: corev1::Secret =
        fetch(store, OPENSHIFT_V4_SOURCE_NAMESPACE, OPENSHIFT_V4_SOURCE_SECRET).await?;

    let ca = config_map
        .data
        .unwrap_or_default()
        .remove("ca-bundle.crt")
        .unwrap_or_default();
    let mut data = secret.data.unwrap_or_default();
    let mut take = |key: &str| {
        data.remove(key)
            .map(|b| String::from_utf8_lossy(&b.0).into_owned())
            .unwrap_or_default()
    };
    let cert = take("tls.crt");
    let key = take("tls.key");

    info!(namespace = OPENSHIFT_V4_SOURCE_NAMESPACE, "read etcd certificates from configmap and secret");
    Ok(CertificateBundle { ca, cert, key })
}

async fn fetch<K>(store: &dyn ObjectStore, namespace: &str, name: &str) -> Result<K, Error>
where
    K: kube::Resource<DynamicType = ()> + serde::de::DeserializeOwned,
{
    let what = format!("{} {namespace}/{name}", K::kind(&()));
    sync::fetch::<K>(store, Some(namespace), name)
        .await
        .context(ReadSnafu { what: what.clone() })?
        .ok_or(Error::MissingSource { what })
}

/// Replaces the whole data map of an existing Secret with the bundle.
pub async fn persist(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
    bundle: &CertificateBundle,
) -> Result<(), Error> {
    let key = ObjectKey::new(ApiResource::erase::<corev1::Secret>(&()), Some(namespace), name);
    let Some(mut secret) = sync::fetch::<corev1::Secret>(store, Some(namespace), name)
        .await
        .context(PersistSnafu)?
    else {
        return MissingSecretSnafu { name }.fail();
    };

    secret.data = Some(bundle.secret_data());
    let desired = Desired::typed(&secret, sync::fields::DATA).context(PersistSnafu)?;
    store
        .replace(&desired.resource, &desired.object)
        .await
        .map_err(|source| sync::Error::Replace {
            key: key.to_string(),
            source,
        })
        .context(PersistSnafu)?;
    info!(secret = %key, "etcd certificates stored");
    Ok(())
}

/// Creates the Secret if needed and converges its data on the bundle.
pub async fn upsert(
    sync: &Synchronizer<'_>,
    name: &str,
    labels: BTreeMap<String, String>,
    bundle: &CertificateBundle,
) -> Result<(), Error> {
    let secret = corev1::Secret {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(sync.namespace().to_owned()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(bundle.secret_data()),
        ..Default::default()
    };
    let desired = Desired::typed(&secret, sync::fields::DATA).context(PersistSnafu)?;
    sync.ensure(desired).await.context(PersistSnafu)?;
    Ok(())
}

/// One refresh of the etcd client Secret in `namespace`. Failures leave the
/// current Secret untouched.
pub async fn refresh(
    store: &dyn ObjectStore,
    pods: &dyn PodCommands,
    openshift_v4: bool,
    openshift: bool,
    minor: u32,
    namespace: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let bundle = if openshift_v4 {
        from_openshift_sources(store).await?
    } else {
        from_pods(pods, openshift, minor, cancel).await?
    };
    bundle.verify()?;
    persist(store, namespace, ETCD_SECRET_NAME, &bundle).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{
        ETCD_CA_CRT, ETCD_PEER_CRT, ETCD_PEER_KEY, MemoryStore, etcd_pod, owner_ref,
    };
    use exec::MockPodCommands;
    use mockall::predicate::eq;

    fn bundle() -> CertificateBundle {
        CertificateBundle {
            ca: ETCD_CA_CRT.to_owned(),
            cert: ETCD_PEER_CRT.to_owned(),
            key: ETCD_PEER_KEY.to_owned(),
        }
    }

    fn exec_output() -> String {
        format!("{ETCD_PEER_KEY}{ETCD_CA_CRT}{ETCD_PEER_CRT}")
    }

    #[test]
    fn test_verify_accepts_matching_bundle() {
        assert!(bundle().verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_broken_parts() {
        let empty = CertificateBundle {
            ca: String::new(),
            ..bundle()
        };
        assert!(matches!(empty.verify(), Err(Error::Empty { .. })));

        let swapped = CertificateBundle {
            key: ETCD_CA_CRT.to_owned(),
            ..bundle()
        };
        assert!(matches!(swapped.verify(), Err(Error::MissingHeader { .. })));

        let mismatched = CertificateBundle {
            cert: ETCD_CA_CRT.to_owned(),
            ..bundle()
        };
        assert!(matches!(mismatched.verify(), Err(Error::Invalid { .. })));
    }

    #[test]
    fn test_peer_files_from_etcd_flags() {
        let pod = etcd_pod(
            "etcd-master-1",
            "Running",
            &[
                "etcd",
                "--peer-key-file=/var/lib/etcd/pki/peer.key",
                "--peer-cert-file=/var/lib/etcd/pki/peer.crt",
                "--data-dir=/var/lib/etcd",
            ],
        );
        let files = PeerFiles::from_pod(&pod);
        assert_eq!(files.key, "/var/lib/etcd/pki/peer.key");
        assert_eq!(files.ca, KUBERNETES_CA_CRT);
        assert_eq!(files.cert, "/var/lib/etcd/pki/peer.crt");
    }

    #[test]
    fn test_read_command() {
        let files = PeerFiles {
            key: "k".to_owned(),
            ca: "a".to_owned(),
            cert: "c".to_owned(),
        };
        assert_eq!(
            files.read_command(false, 27),
            ["/bin/sh", "-c", "echo \"$(<k)\";echo \"$(<a)\";echo \"$(<c)\""]
        );
        assert_eq!(files.read_command(false, 18)[2], "cat k a c");
        assert_eq!(files.read_command(true, 27)[2], "cat k a c");
    }

    #[tokio::test]
    async fn test_from_pods_tries_next_pod() {
        let mut pods = MockPodCommands::new();
        pods.expect_list_pods()
            .with(eq(ETCD_NAMESPACE), eq(ETCD_POD_SELECTOR))
            .returning(|_, _| {
                Ok(vec![
                    etcd_pod("etcd-a", "Running", &[]),
                    etcd_pod("etcd-b", "Pending", &[]),
                    etcd_pod("etcd-c", "Running", &[]),
                ])
            });
        pods.expect_exec()
            .withf(|_, pod, _, _| pod == "etcd-a")
            .times(1)
            .returning(|_, pod, _, _| {
                Err(ApiError::CommandFailed {
                    pod: pod.to_owned(),
                    message: "connection reset".to_owned(),
                })
            });
        pods.expect_exec()
            .withf(|ns, pod, container, _| {
                ns == ETCD_NAMESPACE && pod == "etcd-c" && container == ETCD_CONTAINER
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(ExecOutput {
                    stdout: exec_output(),
                    stderr: String::new(),
                })
            });

        let bundle = from_pods(&pods, false, 27, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bundle.key, ETCD_PEER_KEY);
        assert!(bundle.verify().is_ok());
    }

    #[tokio::test]
    async fn test_from_pods_without_running_pods() {
        let mut pods = MockPodCommands::new();
        pods.expect_list_pods()
            .returning(|_, _| Ok(vec![etcd_pod("etcd-a", "Pending", &[])]));
        pods.expect_exec().never();

        let err = from_pods(&pods, false, 27, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoEtcdPods));
    }

    #[tokio::test]
    async fn test_from_pods_with_empty_output() {
        let mut pods = MockPodCommands::new();
        pods.expect_list_pods()
            .returning(|_, _| Ok(vec![etcd_pod("etcd-a", "Running", &[])]));
        pods.expect_exec()
            .returning(|_, _, _, _| Ok(ExecOutput::default()));

        let err = from_pods(&pods, false, 27, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to execute command in etcd pod");
    }

    #[tokio::test]
    async fn test_from_pods_observes_cancellation() {
        let mut pods = MockPodCommands::new();
        pods.expect_list_pods()
            .returning(|_, _| Ok(vec![etcd_pod("etcd-a", "Running", &[])]));
        pods.expect_exec().returning(|_, _, _, _| {
            Ok(ExecOutput {
                stdout: exec_output(),
                stderr: String::new(),
            })
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = from_pods(&pods, false, 27, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_list_forbidden_is_reported_as_forbidden() {
        let mut pods = MockPodCommands::new();
        pods.expect_list_pods()
            .returning(|_, _| Err(ApiError::forbidden("pods is forbidden")));

        let err = from_pods(&pods, false, 27, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
    }

    #[tokio::test]
    async fn test_persist_requires_existing_secret() {
        let store = MemoryStore::default();
        let err = persist(&store, "monitoring", ETCD_SECRET_NAME, &bundle())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSecret { .. }));
    }

    #[tokio::test]
    async fn test_refresh_on_openshift_v4_reads_operator_sources() {
        let store = MemoryStore::default();
        store.insert_typed(&corev1::ConfigMap {
            metadata: metav1::ObjectMeta {
                name: Some(OPENSHIFT_V4_SOURCE_CONFIGMAP.to_owned()),
                namespace: Some(OPENSHIFT_V4_SOURCE_NAMESPACE.to_owned()),
                ..Default::default()
            },
            data: Some([("ca-bundle.crt".to_owned(), ETCD_CA_CRT.to_owned())].into()),
            ..Default::default()
        });
        store.insert_typed(&corev1::Secret {
            metadata: metav1::ObjectMeta {
                name: Some(OPENSHIFT_V4_SOURCE_SECRET.to_owned()),
                namespace: Some(OPENSHIFT_V4_SOURCE_NAMESPACE.to_owned()),
                ..Default::default()
            },
            data: Some(
                [
                    ("tls.crt".to_owned(), ByteString(ETCD_PEER_CRT.as_bytes().to_vec())),
                    ("tls.key".to_owned(), ByteString(ETCD_PEER_KEY.as_bytes().to_vec())),
                ]
                .into(),
            ),
            ..Default::default()
        });
        store.insert_typed(&corev1::Secret {
            metadata: metav1::ObjectMeta {
                name: Some(ETCD_SECRET_NAME.to_owned()),
                namespace: Some("monitoring".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        });

        let mut pods = MockPodCommands::new();
        pods.expect_list_pods().never();

        refresh(&store, &pods, true, true, 27, "monitoring", &CancellationToken::new())
            .await
            .unwrap();

        let secret: corev1::Secret = sync::fetch(&store, Some("monitoring"), ETCD_SECRET_NAME)
            .await
            .unwrap()
            .unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[SECRET_CA_KEY].0, ETCD_CA_CRT.as_bytes());
        assert_eq!(data[SECRET_CERT_KEY].0, ETCD_PEER_CRT.as_bytes());
        assert_eq!(data[SECRET_KEY_KEY].0, ETCD_PEER_KEY.as_bytes());
    }

    #[tokio::test]
    async fn test_missing_operator_configmap() {
        let store = MemoryStore::default();
        let err = from_openshift_sources(&store).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "ConfigMap openshift-etcd-operator/etcd-metric-serving-ca not found"
        );
    }

    #[tokio::test]
    async fn test_upsert_creates_owned_secret() {
        let store = MemoryStore::default();
        let sync = Synchronizer::new(&store, owner_ref(), "monitoring", true);
        upsert(&sync, ETCD_SECRET_NAME, BTreeMap::new(), &bundle())
            .await
            .unwrap();

        let secret: corev1::Secret = sync::fetch(&store, Some("monitoring"), ETCD_SECRET_NAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secret.data.unwrap().len(), 3);
        assert!(secret.metadata.owner_references.is_some());
    }
}
