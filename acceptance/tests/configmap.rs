#![cfg(feature = "integ")]
use maplit::{btreemap, convert_args};
use zitadel_acceptance::{common_set_values, install_release, with_postgres, RESOURCE_DOMAIN};
use zitadel_harness::assertions::{
    assert_config_map, pre_install_hook_annotations, ConfigMapExpected, Labels,
};
use zitadel_harness::HelmValues;

struct Case {
    name: &'static str,
    set_values: HelmValues,
    zitadel_annotations: Labels,
    /// `None` when the login UI is disabled.
    login_annotations: Option<Labels>,
}

fn expected(extra: &Labels, data_key: &str) -> ConfigMapExpected {
    let mut annotations = pre_install_hook_annotations();
    annotations.extend(extra.clone());
    ConfigMapExpected {
        annotations,
        data_keys: vec![data_key.to_string()],
    }
}

async fn run(case: Case) {
    with_postgres(&format!("cm-{}", case.name), move |env| async move {
        let release = env.make_release("zitadel-test", case.name);
        let values = common_set_values(RESOURCE_DOMAIN).merge(&case.set_values);
        install_release(&env, &release, &values).await?;
        assert_config_map(
            &env,
            &format!("{}-config-yaml", release),
            &expected(&case.zitadel_annotations, "zitadel-config-yaml"),
        )
        .await?;
        if let Some(annotations) = &case.login_annotations {
            assert_config_map(
                &env,
                &format!("{}-login-config-dotenv", release),
                &expected(annotations, ".env"),
            )
            .await?;
        }
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn both_enabled_default() {
    run(Case {
        name: "both-enabled-default",
        set_values: HelmValues::from(convert_args!(btreemap!("login.enabled" => "true"))),
        zitadel_annotations: Labels::new(),
        login_annotations: Some(Labels::new()),
    })
    .await;
}

#[tokio::test]
async fn both_enabled_with_annotations() {
    run(Case {
        name: "both-enabled-with-annotations",
        set_values: HelmValues::from(convert_args!(btreemap!(
            "configMap.annotations.owner" => "platform-team",
            "login.enabled" => "true",
            "login.configMap.annotations.team" => "frontend",
        ))),
        zitadel_annotations: convert_args!(btreemap!("owner" => "platform-team")),
        login_annotations: Some(convert_args!(btreemap!("team" => "frontend"))),
    })
    .await;
}

#[tokio::test]
async fn zitadel_only_login_disabled() {
    run(Case {
        name: "zitadel-only-login-disabled",
        set_values: HelmValues::from(convert_args!(btreemap!(
            "configMap.annotations.config-version" => "v2",
            "login.enabled" => "false",
        ))),
        zitadel_annotations: convert_args!(btreemap!("config-version" => "v2")),
        login_annotations: None,
    })
    .await;
}
