use crate::env::Env;
use crate::error::{self, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use log::info;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use snafu::ResultExt;
use std::collections::BTreeMap;

/// A `kubernetes.io/tls` secret with `ca.crt`, `tls.crt` and `tls.key`.
pub fn tls_secret(name: &str, ca: &[u8], crt: &[u8], key: &[u8]) -> Secret {
    let data = [("ca.crt", ca), ("tls.crt", crt), ("tls.key", key)]
        .iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
        .collect();
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

pub fn opaque_secret(name: &str, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

/// A PEM encoded certificate for `dns_names` signed by its own key, and that key. The first name
/// is the common name.
pub fn self_signed_certificate(dns_names: &[&str]) -> Result<(String, String)> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).context(error::CertificateSnafu)?;
    let names: Vec<String> = dns_names.iter().map(|name| name.to_string()).collect();
    let mut params = CertificateParams::new(names).context(error::CertificateSnafu)?;
    let mut distinguished_name = DistinguishedName::new();
    if let Some(common_name) = dns_names.first() {
        distinguished_name.push(DnType::CommonName, *common_name);
    }
    params.distinguished_name = distinguished_name;
    let certificate = params.self_signed(&key).context(error::CertificateSnafu)?;
    Ok((certificate.pem(), key.serialize_pem()))
}

async fn create(env: &Env, secret: Secret) -> Result<Secret> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let created = env
        .api::<Secret>()
        .create(&PostParams::default(), &secret)
        .await
        .context(error::CreateSnafu {
            what: format!("secret '{}'", name),
        })?;
    info!("Created secret '{}' in '{}'", name, env.namespace());
    Ok(created)
}

pub async fn create_tls_secret(env: &Env, name: &str, ca: &[u8], crt: &[u8], key: &[u8]) -> Result<Secret> {
    create(env, tls_secret(name, ca, crt, key)).await
}

/// A TLS secret holding a fresh [`self_signed_certificate`], which doubles as `ca.crt`.
pub async fn create_self_signed_tls_secret(
    env: &Env,
    name: &str,
    dns_names: &[&str],
) -> Result<Secret> {
    let (crt, key) = self_signed_certificate(dns_names)?;
    create_tls_secret(env, name, crt.as_bytes(), crt.as_bytes(), key.as_bytes()).await
}

pub async fn create_opaque_secret(
    env: &Env,
    name: &str,
    data: BTreeMap<String, String>,
) -> Result<Secret> {
    create(env, opaque_secret(name, data)).await
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
