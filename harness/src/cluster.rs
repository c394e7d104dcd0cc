use crate::error::{self, Result};
use crate::kubectl::KubectlOptions;
use crate::settings::Settings;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use log::info;
use snafu::ResultExt;
use std::convert::TryInto;
use std::path::{Path, PathBuf};

/// A connection to the cluster the chart is tested on. Cloning is cheap and every clone talks to
/// the same cluster through the same client.
#[derive(Clone)]
pub struct Cluster {
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    client: Client,
    settings: Settings,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("kubeconfig", &self.kubeconfig)
            .field("context", &self.context)
            .finish()
    }
}

impl Cluster {
    /// Connects using `KUBECONFIG` if it is set, otherwise the default kubeconfig or the
    /// in-cluster configuration.
    pub async fn connect() -> Result<Self> {
        let settings = Settings::from_env()?;
        match settings.kubeconfig().cloned() {
            Some(path) => Self::from_kubeconfig(path, None, settings).await,
            None => {
                let client = Client::try_default().await.context(error::KubeSnafu {
                    action: "create default client",
                })?;
                info!("Connected to the default cluster");
                Ok(Self {
                    kubeconfig: None,
                    context: None,
                    client,
                    settings,
                })
            }
        }
    }

    /// Connects with an explicit kubeconfig file and, optionally, one of its contexts.
    pub async fn from_kubeconfig<P>(
        path: P,
        context: Option<String>,
        settings: Settings,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let kubeconfig = Kubeconfig::read_from(&path).context(error::ConfigReadSnafu)?;
        let options = KubeConfigOptions {
            context: context.clone(),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .context(error::ClientCreateKubeconfigSnafu)?;
        let client: Client = config.try_into().context(error::KubeSnafu {
            action: "create client from kubeconfig",
        })?;
        info!("Connected to the cluster in '{}'", path.display());
        Ok(Self {
            kubeconfig: Some(path),
            context,
            client,
            settings,
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn kubeconfig(&self) -> Option<&PathBuf> {
        self.kubeconfig.as_ref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Options for `helm` and `kubectl` invocations against this cluster in `namespace`.
    pub fn kubectl_options(&self, namespace: &str) -> KubectlOptions {
        KubectlOptions {
            config_path: self.kubeconfig.clone(),
            context: self.context.clone(),
            namespace: namespace.to_string(),
        }
    }
}
