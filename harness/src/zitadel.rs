/*!

Installs the ZITADEL chart. [`install_chart`] takes an already merged value set and is what the
resource suites use. [`ZitadelInstall`] builds the full value set for an instance that is meant
to serve traffic (database connection, masterkey, machine user) and installs it as release
`zitadel-test`.

!*/

use crate::constants::{DEFAULT_MASTERKEY, DB_SERVICE, ZITADEL_RELEASE};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::helm::{HelmOptions, DEFAULT_HELM_TIMEOUT};
use crate::values::HelmValues;
use log::info;
use std::path::Path;
use std::time::Duration;

/// How a release is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub timeout: Duration,
    /// Pass `--wait` so that Helm returns only once the release is ready.
    pub wait: bool,
    /// Use `helm upgrade --install` instead of `helm install`.
    pub upgrade: bool,
    pub extra_args: Vec<String>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HELM_TIMEOUT,
            wait: true,
            upgrade: true,
            extra_args: Vec::new(),
        }
    }
}

impl InstallOptions {
    /// `helm upgrade --install` without `--wait`, for releases nothing has to become ready in.
    pub fn no_wait() -> Self {
        Self {
            wait: false,
            ..Default::default()
        }
    }

    fn helm_options(&self, values: &HelmValues) -> HelmOptions {
        let mut options = HelmOptions::new(values.clone());
        options = if self.wait {
            options.wait(self.timeout)
        } else {
            options
                .arg("--timeout")
                .arg(format!("{}s", self.timeout.as_secs()))
        };
        for arg in &self.extra_args {
            options = options.arg(arg.clone());
        }
        options
    }
}

/// Installs `chart` as `release` with `values`.
pub async fn install_chart(
    env: &Env,
    chart: &Path,
    release: &str,
    values: &HelmValues,
    options: &InstallOptions,
) -> Result<()> {
    let helm = env.helm();
    let helm_options = options.helm_options(values);
    let chart = chart.display().to_string();
    if options.upgrade {
        helm.upgrade_install(&helm_options, &chart, release).await
    } else {
        helm.install(&helm_options, &chart, release).await
    }
}

/// Succeeds only if installing fails and Helm's output contains `needle`.
pub async fn expect_install_failure(
    env: &Env,
    chart: &Path,
    release: &str,
    values: &HelmValues,
    options: &InstallOptions,
    needle: &str,
) -> Result<()> {
    let result = install_chart(env, chart, release, values, options).await;
    check_failure(release, needle, result)
}

fn check_failure(release: &str, needle: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Err(Error::UnexpectedSuccess {
            what: format!("install '{}'", release),
            needle: needle.to_string(),
        }),
        Err(e) if e.helm_output().map(|o| o.contains(needle)).unwrap_or(false) => {
            info!("Install of '{}' failed as expected", release);
            Ok(())
        }
        Err(e) => Err(Error::UnexpectedFailure {
            what: format!("install '{}'", release),
            needle: needle.to_string(),
            source: Box::new(e),
        }),
    }
}

/// The URL ZITADEL is reachable under. https is used when TLS is on or the port is 443.
pub fn api_base_url(domain: &str, port: Option<&str>, tls: bool) -> String {
    let port = port.filter(|port| !port.is_empty());
    let scheme = if tls || port == Some("443") {
        "https"
    } else {
        "http"
    };
    match port {
        Some(port) => format!("{}://{}:{}", scheme, domain, port),
        None => format!("{}://{}", scheme, domain),
    }
}

/// A serving ZITADEL installation backed by the `db` release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZitadelInstall {
    release: String,
    external_domain: Option<String>,
    external_port: Option<String>,
    tls_enabled: bool,
    self_signed_cert: bool,
    masterkey_secret: Option<String>,
    config_secret: Option<(String, Option<String>)>,
    db_ssl_mode: String,
    db_host: Option<String>,
    db_user: String,
    db_admin_user: String,
    db_password: Option<String>,
    db_admin_password: Option<String>,
    db_ca_crt_secret: Option<String>,
    db_admin_crt_secret: Option<String>,
    db_user_crt_secret: Option<String>,
    machine_user: Option<MachineUser>,
    extra: HelmValues,
    options: InstallOptions,
}

/// A machine user created on the first instance, with a JSON key written to a Secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineUser {
    pub name: String,
    pub username: String,
}

impl Default for ZitadelInstall {
    fn default() -> Self {
        Self {
            release: ZITADEL_RELEASE.to_string(),
            external_domain: None,
            external_port: Some("443".to_string()),
            tls_enabled: false,
            self_signed_cert: false,
            masterkey_secret: None,
            config_secret: None,
            db_ssl_mode: "disable".to_string(),
            db_host: Some(DB_SERVICE.to_string()),
            db_user: "postgres".to_string(),
            db_admin_user: "postgres".to_string(),
            db_password: None,
            db_admin_password: None,
            db_ca_crt_secret: None,
            db_admin_crt_secret: None,
            db_user_crt_secret: None,
            machine_user: None,
            extra: HelmValues::new(),
            options: InstallOptions::default(),
        }
    }
}

impl ZitadelInstall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    /// Whether the pods serve TLS themselves.
    pub fn tls_enabled(&self) -> bool {
        self.tls_enabled
    }

    pub fn machine_user_config(&self) -> Option<&MachineUser> {
        self.machine_user.as_ref()
    }

    pub fn external_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.external_domain = Some(domain.into());
        self
    }

    pub fn external_port<S: Into<String>>(mut self, port: S) -> Self {
        self.external_port = Some(port.into());
        self
    }

    /// Enables TLS and a chart-generated certificate that also covers `additional_dns_name`.
    pub fn self_signed_cert(mut self, additional_dns_name: &str) -> Self {
        self.self_signed_cert = true;
        self.tls_enabled = true;
        if !additional_dns_name.is_empty() {
            self.extra
                .set("zitadel.selfSignedCert.additionalDnsName", additional_dns_name);
        }
        self
    }

    pub fn masterkey_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.masterkey_secret = Some(secret.into());
        self
    }

    pub fn config_secret<S: Into<String>>(mut self, secret: S, key: Option<String>) -> Self {
        self.config_secret = Some((secret.into(), key));
        self
    }

    pub fn db_ssl_mode<S: Into<String>>(mut self, mode: S) -> Self {
        self.db_ssl_mode = mode.into();
        self
    }

    /// Leaves the database host out, for when a config secret provides it.
    pub fn without_db_host(mut self) -> Self {
        self.db_host = None;
        self
    }

    pub fn db_credentials(
        mut self,
        user: &str,
        password: &str,
        admin_user: &str,
        admin_password: &str,
    ) -> Self {
        self.db_user = user.to_string();
        self.db_password = Some(password.to_string()).filter(|p| !p.is_empty());
        self.db_admin_user = admin_user.to_string();
        self.db_admin_password = Some(admin_password.to_string()).filter(|p| !p.is_empty());
        self
    }

    pub fn db_tls_secrets(mut self, ca_crt: &str, admin_crt: &str, user_crt: &str) -> Self {
        let some = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());
        self.db_ca_crt_secret = some(ca_crt);
        self.db_admin_crt_secret = some(admin_crt);
        self.db_user_crt_secret = some(user_crt);
        self
    }

    pub fn machine_user(mut self, name: &str, username: &str) -> Self {
        self.machine_user = Some(MachineUser {
            name: name.to_string(),
            username: username.to_string(),
        });
        self
    }

    /// Values applied last, overriding anything derived from the other settings.
    pub fn values(mut self, values: HelmValues) -> Self {
        self.extra = self.extra.merge(&values);
        self
    }

    pub fn install_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    /// The URL clients use to reach this installation.
    pub fn api_base_url(&self) -> String {
        api_base_url(
            self.external_domain.as_deref().unwrap_or("localhost"),
            self.external_port.as_deref(),
            self.tls_enabled,
        )
    }

    pub fn helm_values(&self) -> HelmValues {
        let mut values = HelmValues::new()
            .with("replicaCount", "1")
            .with("login.replicaCount", "1")
            .with("pdb.enabled", "true")
            .with("ingress.enabled", "true")
            .with("login.ingress.enabled", "true");
        let config = "zitadel.configmapConfig";
        let secret = "zitadel.secretConfig";

        if let Some(domain) = &self.external_domain {
            values.set(format!("{}.ExternalDomain", config), domain);
        }
        if let Some(port) = &self.external_port {
            values.set(format!("{}.ExternalPort", config), port);
        }
        values.set(format!("{}.TLS.Enabled", config), self.tls_enabled);

        if self.self_signed_cert {
            values
                .set("zitadel.selfSignedCert.enabled", "true")
                .set(
                    r"service.annotations.traefik\.ingress\.kubernetes\.io/service\.serversscheme",
                    "https",
                );
        }

        match &self.masterkey_secret {
            Some(name) => values.set("zitadel.masterkeySecretName", name),
            None => values.set("zitadel.masterkey", DEFAULT_MASTERKEY),
        };

        if let Some((name, key)) = &self.config_secret {
            values.set("zitadel.configSecretName", name);
            if let Some(key) = key {
                values.set("zitadel.configSecretKey", key);
            }
        }

        let postgres = format!("{}.Database.Postgres", config);
        if let Some(host) = &self.db_host {
            values.set(format!("{}.Host", postgres), host);
        }
        values
            .set(format!("{}.Port", postgres), "5432")
            .set(format!("{}.Database", postgres), "zitadel")
            .set(format!("{}.MaxOpenConns", postgres), "20")
            .set(format!("{}.MaxIdleConns", postgres), "10")
            .set(format!("{}.MaxConnLifetime", postgres), "30m")
            .set(format!("{}.MaxConnIdleTime", postgres), "5m")
            .set(format!("{}.User.Username", postgres), &self.db_user)
            .set(format!("{}.User.SSL.Mode", postgres), &self.db_ssl_mode)
            .set(format!("{}.Admin.Username", postgres), &self.db_admin_user)
            .set(format!("{}.Admin.SSL.Mode", postgres), &self.db_ssl_mode);

        if let Some(password) = &self.db_password {
            values.set(format!("{}.Database.Postgres.User.Password", secret), password);
        }
        if let Some(password) = &self.db_admin_password {
            values.set(format!("{}.Database.Postgres.Admin.Password", secret), password);
        }

        for (key, value) in [
            ("zitadel.dbSslCaCrtSecret", &self.db_ca_crt_secret),
            ("zitadel.dbSslAdminCrtSecret", &self.db_admin_crt_secret),
            ("zitadel.dbSslUserCrtSecret", &self.db_user_crt_secret),
        ] {
            if let Some(value) = value {
                values.set(key, value);
            }
        }

        if let Some(user) = &self.machine_user {
            let machine = format!("{}.FirstInstance.Org.Machine", config);
            values
                .set(format!("{}.Machine.Username", machine), &user.username)
                .set(format!("{}.Machine.Name", machine), &user.name)
                .set(
                    format!("{}.MachineKey.ExpirationDate", machine),
                    "2029-01-01T00:00:00Z",
                )
                .set(format!("{}.MachineKey.Type", machine), "1")
                .set(format!("{}.Log.Level", config), "debug");
        }

        values.merge(&self.extra)
    }

    /// Installs the chart at `chart` into the namespace of `env`.
    pub async fn install(&self, env: &Env, chart: &Path) -> Result<()> {
        info!(
            "Installing ZITADEL release '{}' in namespace '{}'",
            self.release,
            env.namespace()
        );
        install_chart(env, chart, &self.release, &self.helm_values(), &self.options).await
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_url_scheme() {
        assert_eq!(
            api_base_url("zitadel.local", Some("443"), false),
            "https://zitadel.local:443"
        );
        assert_eq!(
            api_base_url("localhost", Some("8080"), false),
            "http://localhost:8080"
        );
        assert_eq!(
            api_base_url("localhost", Some("8080"), true),
            "https://localhost:8080"
        );
        assert_eq!(api_base_url("localhost", None, false), "http://localhost");
        assert_eq!(api_base_url("localhost", Some(""), true), "https://localhost");
    }

    #[test]
    fn default_values() {
        let values = ZitadelInstall::new().helm_values();
        assert_eq!(values.get("zitadel.masterkey"), Some(DEFAULT_MASTERKEY));
        assert_eq!(values.get("replicaCount"), Some("1"));
        assert_eq!(
            values.get("zitadel.configmapConfig.Database.Postgres.Host"),
            Some("db-postgresql")
        );
        assert_eq!(
            values.get("zitadel.configmapConfig.TLS.Enabled"),
            Some("false")
        );
        assert!(!values.contains_key("zitadel.masterkeySecretName"));
        assert!(!values.contains_key("zitadel.secretConfig.Database.Postgres.User.Password"));
    }

    #[test]
    fn masterkey_secret_replaces_masterkey() {
        let values = ZitadelInstall::new()
            .masterkey_secret("existing-zitadel-masterkey")
            .helm_values();
        assert_eq!(
            values.get("zitadel.masterkeySecretName"),
            Some("existing-zitadel-masterkey")
        );
        assert!(!values.contains_key("zitadel.masterkey"));
    }

    #[test]
    fn self_signed_and_machine_user() {
        let install = ZitadelInstall::new()
            .external_domain("pg-secure.127.0.0.1.sslip.io")
            .self_signed_cert("zitadel.local")
            .machine_user("Admin", "iam-admin")
            .without_db_host();
        let values = install.helm_values();
        assert_eq!(values.get("zitadel.configmapConfig.TLS.Enabled"), Some("true"));
        assert_eq!(
            values.get("zitadel.selfSignedCert.additionalDnsName"),
            Some("zitadel.local")
        );
        assert_eq!(
            values.get(
                r"service.annotations.traefik\.ingress\.kubernetes\.io/service\.serversscheme"
            ),
            Some("https")
        );
        assert_eq!(
            values.get("zitadel.configmapConfig.FirstInstance.Org.Machine.Machine.Username"),
            Some("iam-admin")
        );
        assert!(!values.contains_key("zitadel.configmapConfig.Database.Postgres.Host"));
        assert_eq!(
            install.api_base_url(),
            "https://pg-secure.127.0.0.1.sslip.io:443"
        );
    }

    #[test]
    fn extra_values_win() {
        let values = ZitadelInstall::new()
            .values(HelmValues::new().with("replicaCount", 3))
            .helm_values();
        assert_eq!(values.get("replicaCount"), Some("3"));
    }

    #[test]
    fn expected_failure_matching() {
        let needle = "set either .Values.zitadel.masterkey xor .Values.zitadel.masterkeySecretName";
        let helm_error = |output: &str| Error::HelmCommand {
            args: "upgrade --install".to_string(),
            code: 1,
            output: output.to_string(),
        };

        assert!(check_failure("r", needle, Err(helm_error(&format!("Error: {}", needle)))).is_ok());
        assert!(matches!(
            check_failure("r", needle, Ok(())),
            Err(Error::UnexpectedSuccess { .. })
        ));
        assert!(matches!(
            check_failure("r", needle, Err(helm_error("Error: timed out"))),
            Err(Error::UnexpectedFailure { .. })
        ));
    }
}
