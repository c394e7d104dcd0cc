#![cfg(feature = "integ")]
use k8s_openapi::api::core::v1::Secret;
use std::time::Duration;
use zitadel_acceptance::{chart_path, connect, DIGEST_TAG};
use zitadel_harness::assertions::{assert_absent, assert_masterkey_secret, MasterkeyExpected};
use zitadel_harness::zitadel::{expect_install_failure, install_chart};
use zitadel_harness::{with_namespace, Env, HelmValues, InstallOptions, Result};

const DOMAIN: &str = "masterkey-test.127.0.0.1.sslip.io";
const EXPLICIT_KEY: &str = "abcd1234efgh5678ijkl9012mnop3456";
const EXTERNAL_SECRET: &str = "my-external-masterkey";
const EXTERNAL_KEY: &str = "externalkey1234567890abcdef12345";
const BOTH_SET_ERROR: &str = "set either .Values.zitadel.masterkey xor .Values.zitadel.masterkeySecretName";

/// The masterkey is written by a pre-install hook, so nothing has to become ready.
fn install_options() -> InstallOptions {
    InstallOptions {
        timeout: Duration::from_secs(10 * 60),
        wait: false,
        upgrade: true,
        extra_args: Vec::new(),
    }
}

fn base_values() -> HelmValues {
    let postgres = "zitadel.configmapConfig.Database.Postgres";
    let mut values = HelmValues::new().with("image.tag", DIGEST_TAG);
    values
        .set("zitadel.configmapConfig.ExternalDomain", DOMAIN)
        .set("zitadel.configmapConfig.ExternalPort", "443")
        .set("zitadel.configmapConfig.TLS.Enabled", "false")
        .set(format!("{}.Host", postgres), "db-postgresql")
        .set(format!("{}.Port", postgres), "5432")
        .set(format!("{}.Database", postgres), "zitadel")
        .set(format!("{}.User.Username", postgres), "postgres")
        .set(format!("{}.User.SSL.Mode", postgres), "disable")
        .set(format!("{}.Admin.Username", postgres), "postgres")
        .set(format!("{}.Admin.SSL.Mode", postgres), "disable");
    values
}

async fn install(env: &Env, suffix: &str, values: HelmValues) -> Result<String> {
    let release = env.make_release("zitadel-masterkey-test", suffix);
    let chart = chart_path(env.cluster().settings());
    install_chart(
        env,
        &chart,
        &release,
        &base_values().merge(&values),
        &install_options(),
    )
    .await?;
    Ok(release)
}

/// Applies the externally managed masterkey Secret the way an operator would, with a manifest.
async fn apply_external_secret(env: &Env) -> Result<()> {
    let manifest = format!(
        "apiVersion: v1\nkind: Secret\nmetadata:\n  name: {}\nstringData:\n  masterkey: {}\n",
        EXTERNAL_SECRET, EXTERNAL_KEY
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("masterkey.yaml");
    std::fs::write(&path, manifest).unwrap();
    env.kubectl().apply(&path).await
}

#[tokio::test]
async fn auto_generated_masterkey() {
    let cluster = connect().await.unwrap();
    with_namespace(&cluster, "masterkey-auto", |env| async move {
        let release = install(&env, "auto-generate", HelmValues::new()).await?;
        let expected = MasterkeyExpected {
            secret_created: true,
            generated: true,
            immutable: true,
            ..Default::default()
        };
        assert_masterkey_secret(&env, &release, &expected).await
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn explicit_masterkey() {
    let cluster = connect().await.unwrap();
    with_namespace(&cluster, "masterkey-explicit", |env| async move {
        let values = HelmValues::new().with("zitadel.masterkey", EXPLICIT_KEY);
        let release = install(&env, "explicit", values).await?;
        let expected = MasterkeyExpected {
            secret_created: true,
            value: Some(EXPLICIT_KEY.to_string()),
            immutable: true,
            ..Default::default()
        };
        assert_masterkey_secret(&env, &release, &expected).await
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn external_masterkey_secret() {
    let cluster = connect().await.unwrap();
    with_namespace(&cluster, "masterkey-external", |env| async move {
        apply_external_secret(&env).await?;
        let values = HelmValues::new().with("zitadel.masterkeySecretName", EXTERNAL_SECRET);
        let release = install(&env, "external", values).await?;
        let expected = MasterkeyExpected {
            secret_created: true,
            secret_name: Some(EXTERNAL_SECRET.to_string()),
            value: Some(EXTERNAL_KEY.to_string()),
            external: true,
            ..Default::default()
        };
        assert_masterkey_secret(&env, &release, &expected).await?;
        assert_absent::<Secret>(&env, &format!("{}-masterkey", release)).await
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn masterkey_and_secret_name_are_exclusive() {
    let cluster = connect().await.unwrap();
    with_namespace(&cluster, "masterkey-both", |env| async move {
        let release = env.make_release("zitadel-masterkey-test", "both-set");
        let values = base_values()
            .with("zitadel.masterkey", EXPLICIT_KEY)
            .with("zitadel.masterkeySecretName", EXTERNAL_SECRET);
        expect_install_failure(
            &env,
            &chart_path(env.cluster().settings()),
            &release,
            &values,
            &install_options(),
            BOTH_SET_ERROR,
        )
        .await
    })
    .await
    .unwrap();
}
