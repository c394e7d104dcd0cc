#![cfg(feature = "integ")]
use k8s_openapi::api::apps::v1::Deployment;
use maplit::{btreemap, convert_args};
use zitadel_acceptance::{Renderer, DIGEST_TAG, EXPECTED_VERSION};
use zitadel_harness::assertions::{assert_subset, expected_labels, Labels};
use zitadel_harness::constants::{
    APP_COMPONENT, APP_INSTANCE, APP_NAME, APP_NAME_LOGIN, APP_NAME_ZITADEL,
};
use zitadel_harness::HelmValues;

const RELEASE: &str = "deployment-labels";

struct Case {
    template: &'static str,
    app: &'static str,
    component: &'static str,
}

fn values() -> HelmValues {
    HelmValues::from(convert_args!(btreemap!(
        "image.tag" => DIGEST_TAG,
        "login.enabled" => "true",
        "ingress.enabled" => "true",
        "zitadel.masterkey" => "01234567890123456789012345678901",
    )))
}

/// The Deployment, its selector and its pod template carry the standard labels.
async fn run(case: Case) {
    let renderer = Renderer::new(RELEASE).unwrap();
    let deployment: Deployment = renderer
        .manifests(case.template, &values())
        .await
        .unwrap()
        .single()
        .unwrap();
    let spec = deployment.spec.clone().unwrap();

    let expected = expected_labels(
        RELEASE,
        case.app,
        EXPECTED_VERSION,
        Some(case.component),
        &Labels::new(),
    );
    let selector: Labels = convert_args!(btreemap!(
        APP_NAME => case.app,
        APP_INSTANCE => RELEASE,
        APP_COMPONENT => case.component,
    ));

    assert_subset("Deployment label", deployment.metadata.labels.as_ref(), &expected).unwrap();
    assert_subset("selector label", spec.selector.match_labels.as_ref(), &selector).unwrap();
    assert_subset(
        "pod template label",
        spec.template.metadata.and_then(|meta| meta.labels).as_ref(),
        &expected,
    )
    .unwrap();
}

#[tokio::test]
async fn zitadel() {
    run(Case {
        template: "deployment_zitadel",
        app: APP_NAME_ZITADEL,
        component: "start",
    })
    .await;
}

#[tokio::test]
async fn login() {
    run(Case {
        template: "deployment_login",
        app: APP_NAME_LOGIN,
        component: "login",
    })
    .await;
}
