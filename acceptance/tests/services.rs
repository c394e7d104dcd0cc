#![cfg(feature = "integ")]
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::{btreemap, convert_args};
use zitadel_acceptance::{common_set_values, install_release, with_postgres, RESOURCE_DOMAIN};
use zitadel_harness::assertions::{assert_service, Labels, ServiceExpected};
use zitadel_harness::HelmValues;

struct Case {
    name: &'static str,
    set_values: HelmValues,
    zitadel_port: i32,
    zitadel_annotations: Labels,
    /// `None` when the login UI is disabled.
    login: Option<(i32, Labels)>,
}

/// The annotations Helm puts on every object it owns.
fn helm_annotations(release: &str, namespace: &str) -> Labels {
    convert_args!(btreemap!(
        "meta.helm.sh/release-name" => release,
        "meta.helm.sh/release-namespace" => namespace,
    ))
}

fn with_extra(mut base: Labels, extra: &Labels) -> Labels {
    base.extend(extra.clone());
    base
}

fn selector(release: &str, component: &str, name: &str) -> Labels {
    convert_args!(btreemap!(
        "app.kubernetes.io/component" => component,
        "app.kubernetes.io/instance" => release,
        "app.kubernetes.io/name" => name,
    ))
}

async fn run(case: Case) {
    with_postgres(&format!("svc-{}", case.name), move |env| async move {
        let release = env.make_release("zitadel-test", case.name);
        let values = common_set_values(RESOURCE_DOMAIN).merge(&case.set_values);
        install_release(&env, &release, &values).await?;
        let meta = helm_annotations(&release, env.namespace());

        let mut zitadel_annotations = with_extra(meta.clone(), &case.zitadel_annotations);
        zitadel_annotations.insert(
            "traefik.ingress.kubernetes.io/service.serversscheme".to_string(),
            "h2c".to_string(),
        );
        let zitadel = ServiceExpected {
            type_: "ClusterIP".to_string(),
            port: case.zitadel_port,
            target_port: IntOrString::Int(8080),
            selector: selector(&release, "start", "zitadel"),
            annotations: zitadel_annotations,
        };
        assert_service(&env, &release, &zitadel).await?;

        if let Some((port, annotations)) = &case.login {
            let login = ServiceExpected {
                type_: "ClusterIP".to_string(),
                port: *port,
                target_port: IntOrString::Int(3000),
                selector: selector(&release, "login", "zitadel-login"),
                annotations: with_extra(meta, annotations),
            };
            assert_service(&env, &format!("{}-login", release), &login).await?;
        }
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn both_enabled_default_clusterip() {
    run(Case {
        name: "both-enabled-default-clusterip",
        set_values: HelmValues::from(convert_args!(btreemap!("login.enabled" => "true"))),
        zitadel_port: 8080,
        zitadel_annotations: Labels::new(),
        login: Some((9091, Labels::new())),
    })
    .await;
}

#[tokio::test]
async fn both_enabled_custom_ports() {
    run(Case {
        name: "both-enabled-custom-ports",
        set_values: HelmValues::from(convert_args!(btreemap!(
            "service.port" => "9090",
            "login.enabled" => "true",
            "login.service.port" => "9091",
        ))),
        zitadel_port: 9090,
        zitadel_annotations: Labels::new(),
        login: Some((9091, Labels::new())),
    })
    .await;
}

#[tokio::test]
async fn both_enabled_with_annotations() {
    run(Case {
        name: "both-enabled-with-annotations",
        set_values: HelmValues::from(convert_args!(btreemap!(
            "service.annotations.cloud\\.google\\.com/load-balancer-type" => "Internal",
            "service.annotations.owner" => "platform-team",
            "login.enabled" => "true",
            "login.service.annotations.service\\.beta\\.kubernetes\\.io/aws-load-balancer-internal" => "yes",
        ))),
        zitadel_port: 8080,
        zitadel_annotations: convert_args!(btreemap!(
            "cloud.google.com/load-balancer-type" => "Internal",
            "owner" => "platform-team",
        )),
        login: Some((
            9091,
            convert_args!(btreemap!(
                "service.beta.kubernetes.io/aws-load-balancer-internal" => "yes",
            )),
        )),
    })
    .await;
}

#[tokio::test]
async fn zitadel_only_login_disabled() {
    run(Case {
        name: "zitadel-only-login-disabled",
        set_values: HelmValues::from(convert_args!(btreemap!(
            "service.type" => "ClusterIP",
            "service.port" => "8888",
            "login.enabled" => "false",
        ))),
        zitadel_port: 8888,
        zitadel_annotations: Labels::new(),
        login: None,
    })
    .await;
}
