/*!

Comparisons between live objects in a test namespace and the state a chart configuration is
expected to produce. Failures are reported as [`Error::Mismatch`], [`Error::MissingKey`] or
[`Error::Present`] so that a test can `unwrap()` them with a readable message.

!*/

use crate::constants::{
    APP_COMPONENT, APP_INSTANCE, APP_MANAGED_BY, APP_NAME, APP_VERSION, HELM_HOOK,
    HELM_HOOK_DELETE_POLICY, HELM_HOOK_WEIGHT, MASTERKEY_KEY, PAT_KEY,
};
use crate::env::Env;
use crate::error::{self, Error, Result};
use crate::http_status::AllowNotFound;
use crate::wait::{Await, Budget};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, Pod, PodSecurityContext, PodSpec, ResourceRequirements, Secret,
    SecurityContext, Service, ServiceAccount,
};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::Resource;
use log::{debug, info};
use regex::Regex;
use serde::de::DeserializeOwned;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

pub type Labels = BTreeMap<String, String>;

/// How long [`eventually_get`] polls by default, two seconds apart.
pub const GET_WITHIN: Duration = Duration::from_secs(2 * 60);
const GET_INTERVAL: Duration = Duration::from_secs(2);

/// Reads the object `name` once.
pub async fn get<K>(env: &Env, name: &str) -> Result<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    env.api::<K>().get(name).await.context(error::KubeSnafu {
        action: format!("get {} '{}'", K::kind(&Default::default()), name),
    })
}

/// Reads the object `name` once, mapping a `404` to `None`.
pub async fn get_opt<K>(env: &Env, name: &str) -> Result<Option<K>>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    env.api::<K>()
        .get(name)
        .await
        .allow_not_found(|_| ())
        .context(error::KubeSnafu {
            action: format!("get {} '{}'", K::kind(&Default::default()), name),
        })
}

/// Polls until the object `name` exists.
pub async fn eventually_get<K>(env: &Env, name: &str) -> Result<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    Await::new(
        format!("get {} '{}'", K::kind(&Default::default()), name),
        Budget::Within(GET_WITHIN),
    )
    .interval(GET_INTERVAL)
    .run(|| get::<K>(env, name))
    .await
}

/// Every pod labelled with `app.kubernetes.io/instance=<release>`, which includes the login and
/// job pods of the release.
pub async fn release_pods(env: &Env, release: &str) -> Result<Vec<Pod>> {
    let selector = format!("{}={}", APP_INSTANCE, release);
    let pods = env
        .api::<Pod>()
        .list(&ListParams::default().labels(&selector))
        .await
        .context(error::KubeSnafu {
            action: format!("list pods with '{}'", selector),
        })?;
    Ok(pods.items)
}

/// A single read that must come back `404`.
pub async fn assert_absent<K>(env: &Env, name: &str) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let kind = K::kind(&Default::default()).to_string();
    ensure!(
        get_opt::<K>(env, name).await?.is_none(),
        error::PresentSnafu {
            what: format!("{} '{}'", kind, name),
        }
    );
    debug!("Verified {} '{}' does not exist", kind, name);
    Ok(())
}

fn mismatch<T: Debug>(what: &str, expected: &T, actual: &T) -> Error {
    Error::Mismatch {
        what: what.to_string(),
        expected: format!("{:?}", expected),
        actual: format!("{:?}", actual),
    }
}

fn ensure_eq<T: Debug + PartialEq>(what: &str, expected: &T, actual: &T) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(mismatch(what, expected, actual))
    }
}

/// Every entry of `expected` must be present in `actual` with the same value.
pub fn assert_subset(what: &str, actual: Option<&Labels>, expected: &Labels) -> Result<()> {
    let empty = Labels::new();
    let actual = actual.unwrap_or(&empty);
    for (key, value) in expected {
        let found = actual.get(key);
        if found != Some(value) {
            return Err(Error::Mismatch {
                what: format!("{} '{}'", what, key),
                expected: value.clone(),
                actual: found.cloned().unwrap_or_else(|| "<missing>".to_string()),
            });
        }
    }
    Ok(())
}

pub fn assert_labels_subset<K: Resource>(object: &K, expected: &Labels) -> Result<()> {
    assert_subset(
        &format!("label of '{}'", object.meta().name.as_deref().unwrap_or_default()),
        object.meta().labels.as_ref(),
        expected,
    )
}

pub fn assert_annotations_subset<K: Resource>(object: &K, expected: &Labels) -> Result<()> {
    assert_subset(
        &format!(
            "annotation of '{}'",
            object.meta().name.as_deref().unwrap_or_default()
        ),
        object.meta().annotations.as_ref(),
        expected,
    )
}

/// The labels every object of the chart carries.
pub fn expected_labels(
    release: &str,
    app: &str,
    version: &str,
    component: Option<&str>,
    extra: &Labels,
) -> Labels {
    let mut labels = Labels::new();
    labels.insert(APP_NAME.to_string(), app.to_string());
    labels.insert(APP_INSTANCE.to_string(), release.to_string());
    labels.insert(APP_VERSION.to_string(), version.to_string());
    labels.insert(APP_MANAGED_BY.to_string(), "Helm".to_string());
    if let Some(component) = component.filter(|c| !c.is_empty()) {
        labels.insert(APP_COMPONENT.to_string(), component.to_string());
    }
    labels.extend(extra.clone());
    labels
}

/// The annotations of objects the chart creates in a hook ahead of the setup job, like the
/// ServiceAccounts and the configuration ConfigMaps.
pub fn pre_install_hook_annotations() -> Labels {
    let mut annotations = Labels::new();
    annotations.insert(HELM_HOOK.to_string(), "pre-install,pre-upgrade".to_string());
    annotations.insert(
        HELM_HOOK_DELETE_POLICY.to_string(),
        "before-hook-creation".to_string(),
    );
    annotations.insert(HELM_HOOK_WEIGHT.to_string(), "0".to_string());
    annotations
}

/// The non-empty value of `key` in `secret`.
pub fn secret_value<'a>(secret: &'a Secret, key: &str) -> Result<&'a [u8]> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.as_slice())
        .filter(|value| !value.is_empty())
        .context(error::MissingKeySnafu { secret: name, key })
}

// Masterkey ------------------------------------------------------------------------------------

/// What the masterkey Secret should look like after an install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterkeyExpected {
    pub secret_created: bool,
    /// Overrides the default `<release>-masterkey`.
    pub secret_name: Option<String>,
    /// The chart generated a random key.
    pub generated: bool,
    /// The key the chart was given.
    pub value: Option<String>,
    pub immutable: bool,
    /// The Secret was created outside of the chart, so it carries no hook annotation.
    pub external: bool,
}

impl MasterkeyExpected {
    pub fn secret_name(&self, release: &str) -> String {
        self.secret_name
            .clone()
            .unwrap_or_else(|| format!("{}-masterkey", release))
    }
}

pub fn check_masterkey_secret(secret: &Secret, expected: &MasterkeyExpected) -> Result<()> {
    let value = String::from_utf8_lossy(secret_value(secret, MASTERKEY_KEY)?).to_string();
    if expected.generated {
        ensure_eq("generated masterkey length", &32, &value.len())?;
        let pattern = Regex::new("^[A-Za-z0-9]+$").map_err(|e| Error::Mismatch {
            what: "masterkey pattern".to_string(),
            expected: "a valid regex".to_string(),
            actual: e.to_string(),
        })?;
        ensure!(
            pattern.is_match(&value),
            error::MismatchSnafu {
                what: "generated masterkey",
                expected: "alphanumeric",
                actual: value.clone(),
            }
        );
    } else if let Some(expected_value) = &expected.value {
        ensure_eq("masterkey", expected_value, &value)?;
    }
    if expected.immutable {
        ensure_eq("masterkey secret immutable", &Some(true), &secret.immutable)?;
    }
    if !expected.external {
        let hook = secret
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(HELM_HOOK))
            .cloned();
        ensure_eq(
            "masterkey secret hook",
            &Some("pre-install".to_string()),
            &hook,
        )?;
    }
    Ok(())
}

pub async fn assert_masterkey_secret(
    env: &Env,
    release: &str,
    expected: &MasterkeyExpected,
) -> Result<()> {
    let name = expected.secret_name(release);
    if !expected.secret_created {
        return assert_absent::<Secret>(env, &name).await;
    }
    let secret = get::<Secret>(env, &name).await?;
    check_masterkey_secret(&secret, expected)?;
    info!("Verified masterkey secret '{}'", name);
    Ok(())
}

// Setup job secrets ----------------------------------------------------------------------------

/// A Secret the setup job writes for a machine user or the login client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretExpected {
    pub name: String,
    pub key: String,
    pub present: bool,
}

impl SecretExpected {
    /// The JSON key of machine user `username`, stored as `<username>.json`.
    pub fn machine_key(username: &str) -> Self {
        Self {
            name: username.to_string(),
            key: format!("{}.json", username),
            present: true,
        }
    }

    /// The personal access token of machine user `username`.
    pub fn machine_pat(username: &str) -> Self {
        Self {
            name: format!("{}-pat", username),
            key: PAT_KEY.to_string(),
            present: true,
        }
    }

    /// The login client token, named after `login.loginClientSecretPrefix` and the username.
    pub fn login_client(prefix: &str, username: &str) -> Self {
        Self {
            name: format!("{}{}", prefix, username),
            key: PAT_KEY.to_string(),
            present: true,
        }
    }

    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }
}

pub async fn assert_secret(env: &Env, expected: &SecretExpected, labels: Option<&Labels>) -> Result<()> {
    if !expected.present {
        return assert_absent::<Secret>(env, &expected.name).await;
    }
    let secret = get::<Secret>(env, &expected.name).await?;
    if let Some(labels) = labels {
        assert_labels_subset(&secret, labels)?;
    }
    secret_value(&secret, &expected.key)?;
    debug!("Verified secret '{}'", expected.name);
    Ok(())
}

// PodDisruptionBudget --------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdbExpected {
    pub min_available: Option<IntOrString>,
    pub max_unavailable: Option<IntOrString>,
    pub annotations: Labels,
}

/// Parses a `pdb.minAvailable` style value the way Helm renders it: numbers become integers,
/// everything else stays a string.
pub fn int_or_string(value: &str) -> IntOrString {
    match value.parse::<i32>() {
        Ok(number) => IntOrString::Int(number),
        Err(_) => IntOrString::String(value.to_string()),
    }
}

pub fn check_pdb(pdb: &PodDisruptionBudget, expected: &PdbExpected) -> Result<()> {
    let name = pdb.metadata.name.clone().unwrap_or_default();
    let spec = pdb.spec.clone().unwrap_or_default();
    ensure_eq(
        &format!("minAvailable of PDB '{}'", name),
        &expected.min_available,
        &spec.min_available,
    )?;
    ensure_eq(
        &format!("maxUnavailable of PDB '{}'", name),
        &expected.max_unavailable,
        &spec.max_unavailable,
    )?;
    assert_annotations_subset(pdb, &expected.annotations)
}

/// `None` means the PDB must not exist.
pub async fn assert_pdb(env: &Env, name: &str, expected: Option<&PdbExpected>) -> Result<()> {
    match expected {
        None => assert_absent::<PodDisruptionBudget>(env, name).await,
        Some(expected) => {
            let pdb = get::<PodDisruptionBudget>(env, name).await?;
            check_pdb(&pdb, expected)?;
            info!("Verified PDB configuration for '{}'", name);
            Ok(())
        }
    }
}

// HorizontalPodAutoscaler ----------------------------------------------------------------------

/// A comparable view of an HPA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HpaExpected {
    pub target_kind: String,
    pub target_name: String,
    pub cpu: Option<i32>,
    pub memory: Option<i32>,
    pub annotation: Option<(String, String)>,
    pub has_behavior: bool,
    /// Leave the metrics out of the comparison.
    pub skip_metrics: bool,
}

/// Reduces `hpa` to the fields [`HpaExpected`] covers. Only the annotation named in
/// `annotation_key` is kept.
pub fn normalize_hpa(
    hpa: &HorizontalPodAutoscaler,
    annotation_key: Option<&str>,
    skip_metrics: bool,
) -> HpaExpected {
    let spec = hpa.spec.clone().unwrap_or_default();
    let mut cpu = None;
    let mut memory = None;
    if !skip_metrics {
        for metric in spec.metrics.iter().flatten() {
            let resource = match (&metric.type_[..], &metric.resource) {
                ("Resource", Some(resource)) => resource,
                _ => continue,
            };
            if resource.target.type_ != "Utilization" {
                continue;
            }
            match resource.name.as_str() {
                "cpu" => cpu = resource.target.average_utilization,
                "memory" => memory = resource.target.average_utilization,
                _ => {}
            }
        }
    }
    let annotation = annotation_key.map(|key| {
        let value = hpa
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .cloned()
            .unwrap_or_default();
        (key.to_string(), value)
    });
    HpaExpected {
        target_kind: spec.scale_target_ref.kind,
        target_name: spec.scale_target_ref.name,
        cpu,
        memory,
        annotation,
        has_behavior: spec.behavior.is_some(),
        skip_metrics,
    }
}

pub fn check_hpa(hpa: &HorizontalPodAutoscaler, expected: &HpaExpected) -> Result<()> {
    let key = expected.annotation.as_ref().map(|(key, _)| key.as_str());
    let actual = normalize_hpa(hpa, key, expected.skip_metrics);
    let name = hpa.metadata.name.clone().unwrap_or_default();
    ensure_eq(&format!("HPA '{}'", name), expected, &actual)
}

/// `None` means the HPA must not exist.
pub async fn assert_hpa(env: &Env, name: &str, expected: Option<&HpaExpected>) -> Result<()> {
    match expected {
        None => assert_absent::<HorizontalPodAutoscaler>(env, name).await,
        Some(expected) => {
            let hpa = eventually_get::<HorizontalPodAutoscaler>(env, name).await?;
            check_hpa(&hpa, expected)?;
            info!("Verified HPA configuration for '{}'", name);
            Ok(())
        }
    }
}

// Service --------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceExpected {
    pub type_: String,
    pub port: i32,
    pub target_port: IntOrString,
    pub selector: Labels,
    pub annotations: Labels,
}

pub fn check_service(service: &Service, expected: &ServiceExpected) -> Result<()> {
    let name = service.metadata.name.clone().unwrap_or_default();
    let spec = service.spec.clone().unwrap_or_default();
    ensure_eq(
        &format!("type of Service '{}'", name),
        &Some(expected.type_.clone()),
        &spec.type_,
    )?;
    ensure_eq(
        &format!("selector of Service '{}'", name),
        &Some(expected.selector.clone()),
        &spec.selector,
    )?;
    let port = spec
        .ports
        .as_ref()
        .and_then(|ports| ports.first())
        .context(error::NotFoundSnafu {
            what: format!("a port on Service '{}'", name),
        })?;
    ensure_eq(&format!("port of Service '{}'", name), &expected.port, &port.port)?;
    ensure_eq(
        &format!("targetPort of Service '{}'", name),
        &Some(expected.target_port.clone()),
        &port.target_port,
    )?;
    let annotations = service.metadata.annotations.clone().unwrap_or_default();
    ensure_eq(
        &format!("annotations of Service '{}'", name),
        &expected.annotations,
        &annotations,
    )
}

pub async fn assert_service(env: &Env, name: &str, expected: &ServiceExpected) -> Result<()> {
    let service = get::<Service>(env, name).await?;
    check_service(&service, expected)?;
    info!("Verified Service configuration for '{}'", name);
    Ok(())
}

// ServiceAccount -------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAccountExpected {
    pub annotations: Labels,
}

/// `None` means the ServiceAccount must not exist.
pub async fn assert_service_account(
    env: &Env,
    name: &str,
    expected: Option<&ServiceAccountExpected>,
) -> Result<()> {
    match expected {
        None => assert_absent::<ServiceAccount>(env, name).await,
        Some(expected) => {
            let account = get::<ServiceAccount>(env, name).await?;
            let annotations = account.metadata.annotations.clone().unwrap_or_default();
            ensure_eq(
                &format!("annotations of ServiceAccount '{}'", name),
                &expected.annotations,
                &annotations,
            )?;
            info!("Verified ServiceAccount '{}'", name);
            Ok(())
        }
    }
}

// ConfigMap ------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMapExpected {
    pub annotations: Labels,
    /// Keys that must be present in `data`. Their values are not compared.
    pub data_keys: Vec<String>,
}

pub fn check_config_map(config_map: &ConfigMap, expected: &ConfigMapExpected) -> Result<()> {
    let name = config_map.metadata.name.clone().unwrap_or_default();
    let annotations = config_map.metadata.annotations.clone().unwrap_or_default();
    ensure_eq(
        &format!("annotations of ConfigMap '{}'", name),
        &expected.annotations,
        &annotations,
    )?;
    let data = config_map.data.clone().unwrap_or_default();
    for key in &expected.data_keys {
        ensure!(
            data.contains_key(key),
            error::MissingKeySnafu {
                secret: format!("ConfigMap/{}", name),
                key: key.clone(),
            }
        );
    }
    Ok(())
}

pub async fn assert_config_map(
    env: &Env,
    name: &str,
    expected: &ConfigMapExpected,
) -> Result<()> {
    let config_map = get::<ConfigMap>(env, name).await?;
    check_config_map(&config_map, expected)?;
    info!("Verified ConfigMap configuration for '{}'", name);
    Ok(())
}

// Deployment -----------------------------------------------------------------------------------

fn pod_spec(deployment: &Deployment) -> Result<&PodSpec> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .context(error::NotFoundSnafu {
            what: format!(
                "pod spec of Deployment '{}'",
                deployment.metadata.name.as_deref().unwrap_or_default()
            ),
        })
}

pub fn find_container<'a>(deployment: &'a Deployment, name: &str) -> Option<&'a Container> {
    let spec = pod_spec(deployment).ok()?;
    spec.containers.iter().find(|container| container.name == name)
}

pub fn find_init_container<'a>(deployment: &'a Deployment, name: &str) -> Option<&'a Container> {
    let spec = pod_spec(deployment).ok()?;
    spec.init_containers
        .iter()
        .flatten()
        .find(|container| container.name == name)
}

/// The security contexts a Deployment's pod and each of its containers must have.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityContextExpected {
    pub pod: PodSecurityContext,
    /// Applies to init containers as well.
    pub container: SecurityContext,
}

pub fn check_security_contexts(
    deployment: &Deployment,
    expected: &SecurityContextExpected,
) -> Result<()> {
    let name = deployment.metadata.name.clone().unwrap_or_default();
    let spec = pod_spec(deployment)?;
    ensure_eq(
        &format!("pod securityContext of Deployment '{}'", name),
        &expected.pod,
        &spec.security_context.clone().unwrap_or_default(),
    )?;
    for container in spec.containers.iter().chain(spec.init_containers.iter().flatten()) {
        ensure_eq(
            &format!("securityContext of container '{}' in '{}'", container.name, name),
            &expected.container,
            &container.security_context.clone().unwrap_or_default(),
        )?;
    }
    Ok(())
}

pub async fn assert_security_contexts(
    env: &Env,
    name: &str,
    expected: &SecurityContextExpected,
) -> Result<()> {
    let deployment = eventually_get::<Deployment>(env, name).await?;
    check_security_contexts(&deployment, expected)?;
    info!("Verified security contexts of '{}'", name);
    Ok(())
}

/// The container named like `expected` must equal it field by field, including the defaults the
/// API server fills in.
pub fn check_container(deployment: &Deployment, expected: &Container) -> Result<()> {
    let name = deployment.metadata.name.clone().unwrap_or_default();
    let actual = find_container(deployment, &expected.name).context(error::NotFoundSnafu {
        what: format!("container '{}' in Deployment '{}'", expected.name, name),
    })?;
    ensure_eq(
        &format!("container '{}' in Deployment '{}'", expected.name, name),
        expected,
        actual,
    )
}

pub async fn assert_container(env: &Env, name: &str, expected: &Container) -> Result<()> {
    let deployment = get::<Deployment>(env, name).await?;
    check_container(&deployment, expected)?;
    info!("Verified container '{}' of '{}'", expected.name, name);
    Ok(())
}

/// Requests and limits of `container`. Empty maps count as unset.
pub fn check_resources(container: &Container, expected: &ResourceRequirements) -> Result<()> {
    let actual = container.resources.clone().unwrap_or_default();
    let normalize = |resources: &ResourceRequirements| {
        (
            resources.requests.clone().filter(|requests| !requests.is_empty()),
            resources.limits.clone().filter(|limits| !limits.is_empty()),
        )
    };
    ensure_eq(
        &format!("resources of container '{}'", container.name),
        &normalize(expected),
        &normalize(&actual),
    )
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
