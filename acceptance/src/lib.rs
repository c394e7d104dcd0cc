/*!

Shared setup for the ZITADEL chart test suites in `tests/`: the value baseline every suite
installs with, the chart location, the ingress controller the end-to-end suites reach ZITADEL
through, and the end-to-end checks run against a serving installation.

The suites themselves need a cluster and are only compiled with the `integ` feature.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

use log::info;
use std::future::Future;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::OnceCell;
use zitadel_harness::accessibility::{check_accessibility, check_pod_endpoints};
use zitadel_harness::auth::check_authenticated_api;
use zitadel_harness::browser::check_login;
use zitadel_harness::constants::DEFAULT_MASTERKEY;
use zitadel_harness::manifests::Manifests;
use zitadel_harness::readiness::{
    await_deployment_available, await_job_succeeded, await_secret, dump_job_logs,
};
use zitadel_harness::uninstall::check_uninstall;
use zitadel_harness::zitadel::install_chart;
use zitadel_harness::{
    install_postgres, with_namespace, Cluster, Env, Error, Helm, HelmOptions, HelmValues,
    InstallOptions, KubectlOptions, PostgresOptions, Result, Settings, ZitadelInstall,
};

/// The image the suites pin so that label assertions know the version.
pub const DIGEST_TAG: &str =
    "v4.2.0@sha256:4582be1a9eeae5823aad17f58a58746696c43bcc09851364f0028077ebcadadf";
pub const EXPECTED_VERSION: &str = "v4.2.0";

/// The domain the resource suites configure. Nothing is reached through it.
pub const RESOURCE_DOMAIN: &str = "pg-insecure.127.0.0.1.sslip.io";

/// Installs of the resource suites wait for everything to be ready, which includes the setup job.
pub const RESOURCE_INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const READY_WITHIN: Duration = Duration::from_secs(5 * 60);
const SETUP_JOB_TRIES: u32 = 60;
const SETUP_JOB_INTERVAL: Duration = Duration::from_secs(5);

/// The nginx warning every unprivileged reverse proxy logs on start.
const EXPECTED_NGINX_WARNING: &str =
    r#"the "user" directive makes sense only if the master process runs with super-user privileges"#;

const TRAEFIK_REPO: &str = "https://traefik.github.io/charts";
const TRAEFIK_VERSION: &str = "38.0.2";
const INGRESS_NAMESPACE: &str = "ingress";

/// Initializes `env_logger` for a test binary. Calling it more than once is harmless.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Connects to the cluster named by the environment.
pub async fn connect() -> Result<Cluster> {
    init_logger();
    Cluster::connect().await
}

/// The chart under test. A relative `ZITADEL_HARNESS_CHART_PATH` is resolved against the
/// workspace root rather than the directory cargo runs the test binary in.
pub fn chart_path(settings: &Settings) -> PathBuf {
    let configured = settings.chart_path();
    if configured.is_absolute() {
        return configured.clone();
    }
    let mut root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    root.pop();
    root.join(configured)
}

/// The repository the chart lives in, two levels above the chart.
pub fn repo_root(settings: &Settings) -> PathBuf {
    let chart = chart_path(settings);
    chart
        .parent()
        .and_then(|charts| charts.parent())
        .map(PathBuf::from)
        .unwrap_or(chart)
}

/// `<name>.127.0.0.1.sslip.io`, which resolves to the node the ingress controller listens on.
pub fn sslip_domain(name: &str) -> String {
    format!("{}.127.0.0.1.sslip.io", name)
}

/// The values every resource suite starts from: a fixed masterkey, an insecure PostgreSQL
/// connection to the `db` release, and both ingresses on.
pub fn common_set_values(domain: &str) -> HelmValues {
    let config = "zitadel.configmapConfig";
    let postgres = format!("{}.Database.Postgres", config);
    let mut values = HelmValues::new().with("zitadel.masterkey", DEFAULT_MASTERKEY);
    values
        .set(format!("{}.ExternalDomain", config), domain)
        .set(format!("{}.ExternalPort", config), "443")
        .set(format!("{}.TLS.Enabled", config), "false")
        .set(format!("{}.Host", postgres), "db-postgresql")
        .set(format!("{}.Port", postgres), "5432")
        .set(format!("{}.Database", postgres), "zitadel")
        .set(format!("{}.MaxOpenConns", postgres), "20")
        .set(format!("{}.MaxIdleConns", postgres), "10")
        .set(format!("{}.MaxConnLifetime", postgres), "30m")
        .set(format!("{}.MaxConnIdleTime", postgres), "5m")
        .set(format!("{}.User.Username", postgres), "postgres")
        .set(format!("{}.User.SSL.Mode", postgres), "disable")
        .set(format!("{}.Admin.Username", postgres), "postgres")
        .set(format!("{}.Admin.SSL.Mode", postgres), "disable")
        .set("ingress.enabled", "true")
        .set("login.ingress.enabled", "true");
    values
}

/// Renders single chart templates with `helm template` for the suites that need no cluster.
pub struct Renderer {
    helm: Helm,
    chart: String,
    release: String,
}

impl Renderer {
    /// Renders as `release`, reading helm and the chart location from the environment.
    pub fn new(release: &str) -> Result<Self> {
        init_logger();
        let settings = Settings::from_env()?;
        Ok(Self {
            helm: Helm::new(settings.helm_path(), KubectlOptions::default()),
            chart: chart_path(&settings).display().to_string(),
            release: release.to_string(),
        })
    }

    /// The rendered `templates/<name>.yaml`, or `None` if these values do not render it.
    pub async fn render(&self, name: &str, values: &HelmValues) -> Result<Option<String>> {
        let template = format!("templates/{}.yaml", name);
        let options = HelmOptions::new(values.clone());
        match self
            .helm
            .template(&options, &self.chart, &self.release, &[template.as_str()])
            .await
        {
            Ok(output) if output.trim().is_empty() => Ok(None),
            Ok(output) => Ok(Some(output)),
            Err(e) if not_rendered(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The parsed documents of `templates/<name>.yaml`, which must render.
    pub async fn manifests(&self, name: &str, values: &HelmValues) -> Result<Manifests> {
        let rendered = self.render(name, values).await?.ok_or_else(|| Error::NotFound {
            what: format!("rendered template '{}'", name),
        })?;
        Manifests::parse(&rendered)
    }
}

fn not_rendered(error: &Error) -> bool {
    error
        .helm_output()
        .map(|output| output.contains("could not find template"))
        .unwrap_or(false)
}

/// `[warn]` lines in reverse proxy logs other than the one every unprivileged nginx prints.
pub fn unexpected_nginx_warnings(logs: &str) -> Vec<&str> {
    logs.lines()
        .filter(|line| line.contains("[warn]") && !line.contains(EXPECTED_NGINX_WARNING))
        .collect()
}

/// Runs `body` in a fresh namespace named after `prefix` that already has a PostgreSQL release.
pub async fn with_postgres<T, F, Fut>(prefix: &str, body: F) -> Result<T>
where
    F: FnOnce(Env) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cluster = connect().await?;
    with_namespace(&cluster, prefix, move |env| async move {
        info!(
            "Namespace '{}' created, installing PostgreSQL",
            env.namespace()
        );
        install_postgres(&env, &PostgresOptions::default()).await?;
        body(env).await
    })
    .await
}

/// `helm upgrade --install --wait` of the chart under test. The setup and init job logs are
/// logged when the install fails.
pub async fn install_release(env: &Env, release: &str, values: &HelmValues) -> Result<()> {
    install_release_with_args(env, release, values, &[]).await
}

/// [`install_release`] with additional helm arguments, e.g. `--set-json` values.
pub async fn install_release_with_args(
    env: &Env,
    release: &str,
    values: &HelmValues,
    extra_args: &[&str],
) -> Result<()> {
    let chart = chart_path(env.cluster().settings());
    let options = InstallOptions {
        timeout: RESOURCE_INSTALL_TIMEOUT,
        extra_args: extra_args.iter().map(|arg| arg.to_string()).collect(),
        ..Default::default()
    };
    let result = install_chart(env, &chart, release, values, &options).await;
    if result.is_err() {
        dump_job_logs(env, release).await;
    }
    result
}

/// Installs Traefik into the `ingress` namespace once per test binary. Its node ports 30080 and
/// 30443 are expected to be mapped to 80 and 443 on the host.
pub async fn ensure_ingress_controller(cluster: &Cluster) -> Result<()> {
    static INGRESS: OnceLock<OnceCell<()>> = OnceLock::new();
    INGRESS
        .get_or_init(OnceCell::new)
        .get_or_try_init(|| install_traefik(cluster))
        .await
        .map(|_| ())
}

async fn install_traefik(cluster: &Cluster) -> Result<()> {
    let helm = Helm::new(
        cluster.settings().helm_path(),
        cluster.kubectl_options(INGRESS_NAMESPACE),
    );
    helm.repo_add("traefik", TRAEFIK_REPO).await?;
    let values = HelmValues::new()
        .with("logs.general.level", "DEBUG")
        .with(
            "additionalArguments[0]",
            "--serverstransport.insecureskipverify=true",
        )
        .with("service.type", "NodePort")
        .with("ports.web.nodePort", "30080")
        .with("ports.web.redirections.entryPoint.to", "websecure")
        .with("ports.web.redirections.entryPoint.scheme", "https")
        .with("ports.web.redirections.entryPoint.permanent", "true")
        .with("ports.websecure.nodePort", "30443")
        .with("ingressClass.enabled", "true")
        .with("ingressClass.isDefaultClass", "true");
    let options = HelmOptions::new(values)
        .version(TRAEFIK_VERSION)
        .arg("--create-namespace")
        .wait(Duration::from_secs(10 * 60));
    helm.upgrade_install(&options, "traefik/traefik", "traefik")
        .await?;
    info!("Traefik is serving in namespace '{}'", INGRESS_NAMESPACE);
    Ok(())
}

/// Installs `install`, waits for the setup job and both Deployments, and runs the end-to-end
/// checks against it: endpoint accessibility through the ingress and on every pod, the browser
/// login, the machine user's authenticated API calls when a machine user is configured, and
/// finally a clean uninstall. `whitelist` names resources the test created itself that may
/// outlive the release.
pub async fn install_and_verify(
    env: &Env,
    install: &ZitadelInstall,
    whitelist: &[String],
) -> Result<()> {
    ensure_ingress_controller(env.cluster()).await?;
    let chart = chart_path(env.cluster().settings());
    let release = install.release();
    if let Err(e) = install.install(env, &chart).await {
        dump_job_logs(env, release).await;
        return Err(e);
    }
    await_job_succeeded(
        env,
        &format!("{}-setup", release),
        SETUP_JOB_TRIES,
        SETUP_JOB_INTERVAL,
    )
    .await?;
    await_deployment_available(env, release, READY_WITHIN).await?;
    await_deployment_available(env, &format!("{}-login", release), READY_WITHIN).await?;

    let api_base_url = install.api_base_url();
    info!("Checking accessibility of '{}'", api_base_url);
    check_accessibility(&api_base_url).await?;
    check_pod_endpoints(env, release, install.tls_enabled()).await?;

    check_login(env.cluster().settings(), env.test_name(), &api_base_url).await?;

    if let Some(user) = install.machine_user_config() {
        await_secret(env, &user.username, READY_WITHIN).await?;
        check_authenticated_api(
            env,
            &api_base_url,
            &user.username,
            &format!("{}.json", user.username),
        )
        .await?;
    }

    check_uninstall(env, release, whitelist).await
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn baseline_points_at_the_db_release() {
        let values = common_set_values("example.127.0.0.1.sslip.io");
        assert_eq!(
            values.get("zitadel.configmapConfig.ExternalDomain"),
            Some("example.127.0.0.1.sslip.io")
        );
        assert_eq!(
            values.get("zitadel.configmapConfig.Database.Postgres.Host"),
            Some("db-postgresql")
        );
        assert_eq!(values.get("zitadel.masterkey"), Some(DEFAULT_MASTERKEY));
        assert_eq!(values.get("login.ingress.enabled"), Some("true"));
    }

    #[test]
    fn relative_chart_path_is_rooted_in_the_workspace() {
        let settings = Settings::from_iter(Vec::<(String, String)>::new()).unwrap();
        let path = chart_path(&settings);
        assert!(path.is_absolute());
        assert!(path.ends_with("charts/zitadel"));

        let settings = Settings::from_iter(vec![(
            "ZITADEL_HARNESS_CHART_PATH".to_string(),
            "/srv/charts/zitadel".to_string(),
        )])
        .unwrap();
        assert_eq!(chart_path(&settings), PathBuf::from("/srv/charts/zitadel"));
    }

    #[test]
    fn repository_contains_the_chart() {
        let settings = Settings::from_iter(vec![(
            "ZITADEL_HARNESS_CHART_PATH".to_string(),
            "/srv/zitadel-charts/charts/zitadel".to_string(),
        )])
        .unwrap();
        assert_eq!(repo_root(&settings), PathBuf::from("/srv/zitadel-charts"));
    }

    #[test]
    fn nginx_warnings() {
        let logs = concat!(
            "2025/01/01 00:00:00 [warn] 1#1: the \"user\" directive makes sense only if the master ",
            "process runs with super-user privileges, ignored in /etc/nginx/nginx.conf:2\n",
            "2025/01/01 00:00:00 [notice] 1#1: start worker processes\n",
            "2025/01/01 00:00:01 [warn] 1#1: conflicting server name \"_\" on 0.0.0.0:443, ignored\n",
        );
        let warnings = unexpected_nginx_warnings(logs);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("conflicting server name"));
        assert!(unexpected_nginx_warnings("").is_empty());
    }

    #[test]
    fn sslip_domains() {
        assert_eq!(sslip_domain("machine"), "machine.127.0.0.1.sslip.io");
    }
}
