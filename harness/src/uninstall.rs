use crate::env::Env;
use crate::error::{self, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::Resource;
use log::{info, warn};
use serde::de::DeserializeOwned;
use snafu::{ensure, ResultExt};
use std::collections::BTreeSet;
use std::fmt::Debug;

/// The machine user secret carries `helm.sh/resource-policy: keep` and survives an uninstall.
pub const MACHINE_USER_SECRET: &str = "Secret/zitadel-admin-sa";

/// Resources that are expected to remain after `helm uninstall <release>`. Hooks with the
/// `before-hook-creation` delete policy are only removed when the next hook is created.
pub fn default_whitelist(release: &str) -> Vec<String> {
    let mut whitelist = vec![MACHINE_USER_SECRET.to_string()];
    whitelist.extend(
        [
            ("Secret", "-masterkey"),
            ("Secret", "-secrets-yaml"),
            ("ConfigMap", "-config-yaml"),
            ("ConfigMap", "-login-config-dotenv"),
            ("Job", "-init"),
            ("Job", "-setup"),
            ("ServiceAccount", ""),
            ("ServiceAccount", "-login"),
            ("Role", ""),
            ("RoleBinding", ""),
        ]
        .iter()
        .map(|(kind, suffix)| format!("{}/{}{}", kind, release, suffix)),
    );
    whitelist
}

/// The sorted entries of `remaining` that are in neither whitelist.
pub fn unexpected_leftovers(
    remaining: &[String],
    release: &str,
    whitelist: &[String],
) -> Vec<String> {
    let allowed: BTreeSet<String> = default_whitelist(release)
        .into_iter()
        .chain(whitelist.iter().cloned())
        .collect();
    let mut unexpected: Vec<String> = remaining
        .iter()
        .filter(|resource| !allowed.contains(*resource))
        .cloned()
        .collect();
    unexpected.sort();
    unexpected.dedup();
    unexpected
}

async fn names_with_prefix<K>(env: &Env, prefix: &str) -> Result<Vec<String>>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let kind = K::kind(&Default::default()).to_string();
    let list = env
        .api::<K>()
        .list(&ListParams::default())
        .await
        .context(error::KubeSnafu {
            action: format!("list {} resources", kind),
        })?;
    Ok(list
        .items
        .iter()
        .filter_map(|object| object.meta().name.as_deref())
        .filter(|name| name.starts_with(prefix))
        .map(|name| format!("{}/{}", kind, name))
        .collect())
}

/// Every resource in the namespace of `env` whose name starts with `release`, as `Kind/name`.
pub async fn release_resources(env: &Env, release: &str) -> Result<Vec<String>> {
    let mut resources = Vec::new();
    resources.extend(names_with_prefix::<Secret>(env, release).await?);
    resources.extend(names_with_prefix::<ConfigMap>(env, release).await?);
    resources.extend(names_with_prefix::<Service>(env, release).await?);
    resources.extend(names_with_prefix::<Deployment>(env, release).await?);
    resources.extend(names_with_prefix::<StatefulSet>(env, release).await?);
    resources.extend(names_with_prefix::<Job>(env, release).await?);
    resources.extend(names_with_prefix::<PersistentVolumeClaim>(env, release).await?);
    resources.extend(names_with_prefix::<Ingress>(env, release).await?);
    resources.extend(names_with_prefix::<ServiceAccount>(env, release).await?);
    resources.extend(names_with_prefix::<Role>(env, release).await?);
    resources.extend(names_with_prefix::<RoleBinding>(env, release).await?);
    // Clusters without policy/v1 have no PDBs to leave behind.
    match names_with_prefix::<PodDisruptionBudget>(env, release).await {
        Ok(pdbs) => resources.extend(pdbs),
        Err(e) => warn!("Unable to list PodDisruptionBudgets: {}", e),
    }
    Ok(resources)
}

/// Uninstalls `release` and fails if anything but the whitelisted resources remains.
pub async fn check_uninstall(env: &Env, release: &str, whitelist: &[String]) -> Result<()> {
    env.helm().uninstall(release, true).await?;
    let remaining = release_resources(env, release).await?;
    let unexpected = unexpected_leftovers(&remaining, release, whitelist);
    ensure!(
        unexpected.is_empty(),
        error::LeftoversSnafu {
            resources: unexpected,
        }
    );
    info!(
        "Release '{}' left only expected resources behind: {:?}",
        release, remaining
    );
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
