use crate::cluster::Cluster;
use crate::error::{self, Error, Result};
use crate::helm::Helm;
use crate::kubectl::{Kubectl, KubectlOptions};
use crate::naming::{namespace_name, release_name, unique_id};
use crate::wait::retry;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::{Api, Client, Resource};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// The overall limit for a single test body run by [`with_namespace`].
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How a test body ended, which decides whether its namespace survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
}

impl<T> From<&Result<T>> for Outcome {
    fn from(result: &Result<T>) -> Self {
        if result.is_ok() {
            Outcome::Passed
        } else {
            Outcome::Failed
        }
    }
}

/// A freshly created namespace and everything a test needs to work in it.
#[derive(Debug, Clone)]
pub struct Env {
    cluster: Cluster,
    test_name: String,
    namespace: String,
    options: KubectlOptions,
}

impl Env {
    /// Creates a uniquely named namespace for the test called `prefix` and waits until it can be
    /// read back.
    pub async fn create(cluster: &Cluster, prefix: &str) -> Result<Self> {
        let namespace = namespace_name(prefix, &unique_id(), cluster.settings().github_sha());
        let api: Api<Namespace> = Api::all(cluster.client());
        let object = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &object)
            .await
            .context(error::CreateSnafu {
                what: format!("namespace '{}'", namespace),
            })?;

        retry(
            &format!("read namespace '{}'", namespace),
            30,
            Duration::from_secs(1),
            || async {
                api.get(&namespace).await.context(error::KubeSnafu {
                    action: format!("get namespace '{}'", namespace),
                })
            },
        )
        .await?;
        info!("Created namespace '{}'", namespace);

        Ok(Self {
            cluster: cluster.clone(),
            test_name: prefix.to_string(),
            options: cluster.kubectl_options(&namespace),
            namespace,
        })
    }

    /// Deletes the namespace after a passing test and keeps it after a failing one. Deletion is
    /// best effort.
    pub async fn teardown(self, outcome: Outcome) {
        match outcome {
            Outcome::Failed => {
                warn!(
                    "Test failed, keeping namespace '{}' for debugging",
                    self.namespace
                );
            }
            Outcome::Passed => {
                let api: Api<Namespace> = Api::all(self.client());
                match api.delete(&self.namespace, &DeleteParams::default()).await {
                    Ok(_) => info!("Deleted namespace '{}'", self.namespace),
                    Err(e) => error!("Unable to delete namespace '{}': {}", self.namespace, e),
                }
            }
        }
    }

    /// A release name `<base>-<suffix>-<random id>` that is valid for Helm.
    pub fn make_release(&self, base: &str, suffix: &str) -> String {
        release_name(base, suffix, &unique_id())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn client(&self) -> Client {
        self.cluster.client()
    }

    pub fn options(&self) -> &KubectlOptions {
        &self.options
    }

    /// A namespaced API for `K` in this environment.
    pub fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client(), &self.namespace)
    }

    pub fn helm(&self) -> Helm {
        Helm::new(self.cluster.settings().helm_path(), self.options.clone())
    }

    pub fn kubectl(&self) -> Kubectl {
        Kubectl::new(self.cluster.settings().kubectl_path(), self.options.clone())
    }
}

/// Runs `body` in a fresh namespace named after `prefix`, bounded by [`TEST_TIMEOUT`]. The
/// namespace is deleted when the body succeeds and kept when it fails.
pub async fn with_namespace<T, F, Fut>(cluster: &Cluster, prefix: &str, body: F) -> Result<T>
where
    F: FnOnce(Env) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let env = Env::create(cluster, prefix).await?;
    let result = match tokio::time::timeout(TEST_TIMEOUT, body(env.clone())).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            what: format!("test '{}'", prefix),
            timeout: TEST_TIMEOUT,
        }),
    };
    env.teardown(Outcome::from(&result)).await;
    result
}
