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

use rustls::crypto::ring::sign;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls_pemfile::Item;
use snafu::{ResultExt, Snafu};
use std::io::{self, Cursor};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("parse certificate error: {source}"))]
    InvalidCertificate { source: io::Error },

    #[snafu(display("no certificate"))]
    NonCertificate,

    #[snafu(display("parse private key error: {source}"))]
    InvalidPrivateKey { source: io::Error },

    #[snafu(display("no private key"))]
    NonPrivateKey,

    #[snafu(display("key pair match failed: {source}"))]
    MatchFailed { source: rustls::Error },

    #[snafu(display("no supported sign type: {source}"))]
    NoSupportedSignType { source: rustls::Error },

    #[snafu(display("no supported pem type"))]
    NoSupportedPEMType,
}

/// Decodes every certificate of a PEM bundle. An empty bundle is an error.
pub fn load_certs(cert: &[u8]) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(cert))
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .context(InvalidCertificateSnafu)?;

    if certs.is_empty() {
        return NonCertificateSnafu.fail();
    }

    Ok(certs)
}

/// First private key of a PEM document, skipping any certificates before it.
pub fn load_private_key(private_key: &[u8]) -> Result<PrivateKeyDer<'static>, Error> {
    let mut reader = Cursor::new(private_key);
    loop {
        let item = rustls_pemfile::read_one(&mut reader)
            .context(InvalidPrivateKeySnafu)?
            .ok_or(Error::NonPrivateKey)?;

        return match item {
            Item::Pkcs8Key(key) => Ok(key.into()),
            Item::Pkcs1Key(key) => Ok(key.into()),
            Item::Sec1Key(key) => Ok(key.into()),
            Item::X509Certificate(_) => continue,
            _ => NoSupportedPEMTypeSnafu.fail(),
        };
    }
}

/// Checks that the key belongs to the first certificate of `cert_pem`.
pub fn x509_key_pair<T: AsRef<[u8]>>(cert_pem: T, key_pem: T) -> Result<(), Error> {
    let certs = load_certs(cert_pem.as_ref())?;
    let private_key = load_private_key(key_pem.as_ref())?;

    let signing_key = sign::any_supported_type(&private_key).context(NoSupportedSignTypeSnafu)?;

    let certified_key = CertifiedKey::new(certs, signing_key);
    certified_key.keys_match().context(MatchFailedSnafu)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{ETCD_CA_CRT, ETCD_PEER_CRT, ETCD_PEER_KEY, ETCD_PEER_RSA_KEY};

    #[test]
    fn test_key_formats() {
        assert!(matches!(
            load_private_key(ETCD_PEER_KEY.as_bytes()),
            Ok(PrivateKeyDer::Pkcs8(_))
        ));
        assert!(matches!(
            load_private_key(ETCD_PEER_RSA_KEY.as_bytes()),
            Ok(PrivateKeyDer::Pkcs1(_))
        ));
    }

    #[test]
    fn test_peer_pair_matches() {
        assert!(x509_key_pair(ETCD_PEER_CRT, ETCD_PEER_KEY).is_ok());
        assert!(x509_key_pair(ETCD_PEER_CRT, ETCD_PEER_RSA_KEY).is_ok());
    }

    #[test]
    fn test_ca_does_not_match_peer_key() {
        // the CA is an EC certificate, the peer key is RSA
        assert!(x509_key_pair(ETCD_CA_CRT, ETCD_PEER_KEY).is_err());
    }

    #[test]
    fn test_load_certs() {
        assert_eq!(load_certs(ETCD_CA_CRT.as_bytes()).unwrap().len(), 1);

        let bundle = format!("{ETCD_CA_CRT}{ETCD_PEER_CRT}");
        assert_eq!(load_certs(bundle.as_bytes()).unwrap().len(), 2);

        assert!(matches!(
            load_certs(ETCD_PEER_KEY.as_bytes()),
            Err(Error::NonCertificate)
        ));
    }

    #[test]
    fn test_missing_key() {
        assert!(matches!(
            load_private_key(ETCD_CA_CRT.as_bytes()),
            Err(Error::NonPrivateKey)
        ));
    }
}
