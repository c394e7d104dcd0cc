#![cfg(feature = "integ")]
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::Api;
use maplit::btreemap;
use std::time::Duration;
use zitadel_harness::assertions::{assert_absent, get, secret_value};
use zitadel_harness::secrets::{create_opaque_secret, create_tls_secret};
use zitadel_harness::{
    eventually, install_database, with_namespace, AllowNotFound, Cluster, Env, Error, Outcome,
    COCKROACH,
};

async fn connect() -> Cluster {
    let _ = env_logger::builder().is_test(true).try_init();
    Cluster::connect().await.unwrap()
}

#[tokio::test]
async fn passing_test_deletes_its_namespace() {
    let cluster = connect().await;
    let env = Env::create(&cluster, "harness-lifecycle").await.unwrap();
    let name = env.namespace().to_string();
    assert!(name.starts_with("harness-lifecycle-"));
    assert!(name.len() <= 63);

    env.teardown(Outcome::Passed).await;
    let api: Api<Namespace> = Api::all(cluster.client());
    eventually("namespace to terminate", Duration::from_secs(60), || async {
        let namespace = api.get(&name).await.allow_not_found(|_| ());
        match namespace {
            Ok(None) => Ok(()),
            Ok(Some(namespace)) if namespace.metadata.deletion_timestamp.is_some() => Ok(()),
            Ok(Some(_)) => Err(Error::Present {
                what: format!("namespace '{}'", name),
            }),
            Err(e) => Err(Error::Kube {
                action: format!("get namespace '{}'", name),
                source: e,
            }),
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn secret_fixtures() {
    let cluster = connect().await;
    with_namespace(&cluster, "harness-secrets", |env| async move {
        create_tls_secret(&env, "db-tls", b"ca", b"crt", b"key").await?;
        let tls = get::<Secret>(&env, "db-tls").await?;
        assert_eq!(tls.type_.as_deref(), Some("kubernetes.io/tls"));
        assert_eq!(secret_value(&tls, "tls.key")?, b"key");

        create_opaque_secret(
            &env,
            "existing-zitadel-masterkey",
            btreemap! { "masterkey".to_string() => "x123456789012345678901234567891y".to_string() },
        )
        .await?;
        let opaque = get::<Secret>(&env, "existing-zitadel-masterkey").await?;
        assert_eq!(
            secret_value(&opaque, "masterkey")?,
            b"x123456789012345678901234567891y"
        );
        assert_absent::<Secret>(&env, "no-such-secret").await
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn cockroach_database() {
    let cluster = connect().await;
    with_namespace(&cluster, "harness-crdb", |env| async move {
        install_database(&env, &COCKROACH).await
    })
    .await
    .unwrap();
}
