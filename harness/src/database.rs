use crate::constants::{DB_POD, DB_RELEASE, DB_SERVICE};
use crate::env::Env;
use crate::error::Result;
use crate::helm::{HelmOptions, DEFAULT_HELM_TIMEOUT};
use crate::readiness::{await_pod_ready, await_service_available};
use crate::values::HelmValues;
use crate::wait::eventually;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

/// Tries for the database service and pod, five seconds apart.
const DB_READY_TRIES: u32 = 60;
const DB_READY_INTERVAL: Duration = Duration::from_secs(5);

/// A database chart the ZITADEL chart can be tested against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseChart {
    pub repo_url: &'static str,
    /// Base name of the local repository alias. The namespace is appended so that parallel tests
    /// do not race on `helm repo add`.
    pub repo_name: &'static str,
    pub chart: &'static str,
    pub version: Option<&'static str>,
    pub set_values: &'static [(&'static str, &'static str)],
    pub values_file: Option<PathBuf>,
    pub release: &'static str,
    /// The service and pod that must be ready before ZITADEL can connect.
    pub service: &'static str,
    pub pod: &'static str,
}

pub const POSTGRES: DatabaseChart = DatabaseChart {
    repo_url: "https://charts.bitnami.com/bitnami",
    repo_name: "bitnami",
    chart: "postgresql",
    version: Some("12.10.0"),
    set_values: &[],
    values_file: None,
    release: DB_RELEASE,
    service: DB_SERVICE,
    pod: DB_POD,
};

pub const COCKROACH: DatabaseChart = DatabaseChart {
    repo_url: "https://charts.cockroachdb.com/",
    repo_name: "crdb",
    chart: "cockroachdb",
    version: Some("11.1.5"),
    set_values: &[("statefulset.replicas", "1"), ("conf.single-node", "true")],
    values_file: None,
    release: DB_RELEASE,
    service: "db-cockroachdb-public",
    pod: "db-cockroachdb-0",
};

impl DatabaseChart {
    /// A copy of this chart that is installed with `values_file`.
    pub fn with_values<P: Into<PathBuf>>(&self, values_file: P) -> DatabaseChart {
        DatabaseChart {
            values_file: Some(values_file.into()),
            ..self.clone()
        }
    }

    pub fn repo_alias(&self, namespace: &str) -> String {
        format!("{}-{}", self.repo_name, namespace)
    }

    pub fn values(&self) -> HelmValues {
        self.set_values.iter().copied().collect()
    }

    pub fn helm_options(&self, extra: &HelmValues) -> HelmOptions {
        let mut options = HelmOptions::new(self.values().merge(extra));
        if let Some(version) = self.version {
            options = options.version(version);
        }
        if let Some(file) = &self.values_file {
            options = options.values_file(file.clone());
        }
        options.wait(DEFAULT_HELM_TIMEOUT).arg("--hide-notes")
    }
}

/// Options for the PostgreSQL fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostgresOptions {
    /// A `kubernetes.io/tls` secret with `tls.crt` and `tls.key`. Enables TLS when set.
    pub tls_secret: Option<String>,
    pub password: Option<String>,
}

impl PostgresOptions {
    pub fn tls<S: Into<String>>(mut self, secret: S) -> Self {
        self.tls_secret = Some(secret.into());
        self
    }

    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Images from the `bitnamilegacy` repositories, no persistence, and either TLS or a `trust`
    /// `pg_hba` rule.
    pub fn values(&self) -> HelmValues {
        let mut values = HelmValues::new()
            .with("image.repository", "bitnamilegacy/postgresql")
            .with("volumePermissions.image.repository", "bitnamilegacy/os-shell")
            .with("metrics.image.repository", "bitnamilegacy/postgres-exporter")
            .with("primary.persistence.enabled", "false");
        match &self.tls_secret {
            Some(secret) => {
                values
                    .set("tls.enabled", "true")
                    .set("tls.certificatesSecret", secret)
                    .set("tls.certFilename", "tls.crt")
                    .set("tls.certKeyFilename", "tls.key")
                    .set("volumePermissions.enabled", "true");
            }
            None => {
                values.set("primary.pgHbaConfiguration", "host all all all trust");
            }
        }
        if let Some(password) = &self.password {
            values.set("auth.postgresPassword", password);
        }
        values
    }
}

/// Installs `chart` as release `db` into the namespace of `env` and waits for it to serve.
pub async fn install_database(env: &Env, chart: &DatabaseChart) -> Result<()> {
    install(env, chart, &HelmValues::new()).await
}

/// Installs PostgreSQL configured by `options`.
pub async fn install_postgres(env: &Env, options: &PostgresOptions) -> Result<()> {
    install(env, &POSTGRES, &options.values()).await
}

async fn install(env: &Env, chart: &DatabaseChart, extra: &HelmValues) -> Result<()> {
    let helm = env.helm();
    let alias = chart.repo_alias(env.namespace());
    eventually(
        &format!("add helm repository '{}'", alias),
        Duration::from_secs(60),
        || helm.repo_add(&alias, chart.repo_url),
    )
    .await?;

    let chart_ref = format!("{}/{}", alias, chart.chart);
    helm.install(&chart.helm_options(extra), &chart_ref, chart.release)
        .await?;

    await_service_available(env, chart.service, DB_READY_TRIES, DB_READY_INTERVAL).await?;
    await_pod_ready(env, chart.pod, DB_READY_TRIES, DB_READY_INTERVAL).await?;
    info!(
        "Database '{}' is ready in namespace '{}'",
        chart.chart,
        env.namespace()
    );
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
