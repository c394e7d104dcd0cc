#![cfg(feature = "integ")]
use zitadel_acceptance::{
    common_set_values, install_release, with_postgres, DIGEST_TAG, EXPECTED_VERSION,
    RESOURCE_DOMAIN,
};
use zitadel_harness::assertions::{assert_secret, expected_labels, Labels, SecretExpected};
use zitadel_harness::constants::{APP_NAME_ZITADEL, MASTERKEY_KEY};
use zitadel_harness::HelmValues;

const ORG: &str = "zitadel.configmapConfig.FirstInstance.Org";

struct Case {
    name: &'static str,
    set_values: HelmValues,
    expected: Vec<SecretExpected>,
}

/// Org values for a machine user, with a PAT when `pat` is set.
fn machine(username: &str, name: &str, pat: bool) -> HelmValues {
    let mut values = HelmValues::new();
    values
        .set(format!("{}.Machine.Machine.Username", ORG), username)
        .set(format!("{}.Machine.Machine.Name", ORG), name)
        .set(
            format!("{}.Machine.MachineKey.ExpirationDate", ORG),
            "2029-01-01T00:00:00Z",
        )
        .set(format!("{}.Machine.MachineKey.Type", ORG), "1");
    if pat {
        values.set(
            format!("{}.Machine.Pat.ExpirationDate", ORG),
            "2029-01-01T00:00:00Z",
        );
    }
    values
}

fn login_client(username: &str) -> HelmValues {
    HelmValues::new()
        .with(format!("{}.LoginClient.Machine.Username", ORG), username)
        .with(format!("{}.LoginClient.Machine.Name", ORG), "Login Client")
        .with(
            format!("{}.LoginClient.Pat.ExpirationDate", ORG),
            "2029-01-01T00:00:00Z",
        )
}

/// Installs the chart and checks the masterkey plus every Secret the setup job should have
/// written, or must not have written.
async fn run(case: Case) {
    with_postgres(&format!("secrets-{}", case.name), move |env| async move {
        let release = env.make_release("zitadel-secrets-test", case.name);
        let values = common_set_values(RESOURCE_DOMAIN)
            .with("image.tag", DIGEST_TAG)
            .with("ingress.enabled", "false")
            .with("login.ingress.enabled", "false")
            .merge(&case.set_values);
        install_release(&env, &release, &values).await?;

        let labels = expected_labels(
            &release,
            APP_NAME_ZITADEL,
            EXPECTED_VERSION,
            None,
            &Labels::new(),
        );
        let masterkey = SecretExpected {
            name: format!("{}-masterkey", release),
            key: MASTERKEY_KEY.to_string(),
            present: true,
        };
        assert_secret(&env, &masterkey, Some(&labels)).await?;
        for expected in &case.expected {
            assert_secret(&env, expected, None).await?;
        }
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn default_all_enabled() {
    run(Case {
        name: "default-all-enabled",
        set_values: machine("iam-admin", "Admin Machine", true).merge(&login_client("login-client")),
        expected: vec![
            SecretExpected::machine_key("iam-admin"),
            SecretExpected::machine_pat("iam-admin"),
            SecretExpected::login_client("", "login-client"),
        ],
    })
    .await;
}

#[tokio::test]
async fn machine_only_no_pat() {
    run(Case {
        name: "machine-only-no-pat",
        set_values: machine("my-machine", "My Machine", false).merge(&login_client("login-client")),
        expected: vec![
            SecretExpected::machine_key("my-machine"),
            SecretExpected::login_client("", "login-client"),
        ],
    })
    .await;
}

#[tokio::test]
async fn login_client_only() {
    run(Case {
        name: "login-client-only",
        set_values: login_client("login-client"),
        expected: vec![SecretExpected::login_client("", "login-client")],
    })
    .await;
}

#[tokio::test]
async fn custom_names_with_prefix() {
    let mut set_values = machine("custom-admin", "Custom Admin", true).merge(&login_client("login-client"));
    set_values.set("login.loginClientSecretPrefix", "myapp-");
    run(Case {
        name: "custom-names-with-prefix",
        set_values,
        expected: vec![
            SecretExpected::machine_key("custom-admin"),
            SecretExpected::machine_pat("custom-admin"),
            SecretExpected::login_client("myapp-", "login-client"),
            SecretExpected::login_client("", "login-client").absent(),
        ],
    })
    .await;
}

#[tokio::test]
async fn minimal_no_setup() {
    run(Case {
        name: "minimal-no-setup",
        set_values: HelmValues::new(),
        expected: vec![],
    })
    .await;
}
