use crate::constants::{APP_INSTANCE, APP_NAME, APP_NAME_ZITADEL};
use crate::env::Env;
use crate::error::{self, Result};
use crate::grpc::GrpcClient;
use crate::http::{HttpResponse, InsecureClient};
use crate::readiness::pod_ready;
use crate::wait::{await_all, eventually, Await, Budget, Check};
use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use log::{debug, info};
use snafu::{ensure, ResultExt};
use std::time::Duration;
use url::Url;

/// Every check is retried for a minute, one second apart.
pub const CHECK_WITHIN: Duration = Duration::from_secs(60);
/// The HTTP port ZITADEL listens on inside its pods.
pub const ZITADEL_POD_PORT: u16 = 8080;

/// How long a service behind a fresh port-forward gets to answer, polled five seconds apart.
pub const SERVICE_CHECK_WITHIN: Duration = Duration::from_secs(2 * 60);
const SERVICE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub const DEBUG_ENDPOINTS: [&str; 3] = ["/debug/validate", "/debug/healthz", "/debug/ready"];

/// The `host[:port]` part of `api_base_url`.
pub fn host_with_port(api_base_url: &str) -> Result<String> {
    let url = Url::parse(api_base_url).context(error::InvalidUrlSnafu { url: api_base_url })?;
    let host = url.host_str().unwrap_or_default();
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Whether `body` contains `"<field>":"http://<host>"` or the https variant.
pub fn names_host(body: &str, field: &str, host: &str) -> bool {
    ["http", "https"]
        .iter()
        .any(|scheme| body.contains(&format!(r#""{}":"{}://{}""#, field, scheme, host)))
}

pub fn check_discovery_body(body: &str, host: &str) -> Result<()> {
    ensure!(
        names_host(body, "issuer", host),
        error::ContentMissingSnafu {
            what: "OIDC discovery document",
            needle: format!("issuer for host {}", host),
        }
    );
    Ok(())
}

pub fn check_environment_body(body: &str, host: &str) -> Result<()> {
    for field in ["api", "issuer"] {
        ensure!(
            names_host(body, field, host),
            error::ContentMissingSnafu {
                what: "environment.json",
                needle: format!("{} for host {}", field, host),
            }
        );
    }
    Ok(())
}

fn status_checks<'a>(client: &'a InsecureClient, base: &str) -> Vec<Check<'a>> {
    DEBUG_ENDPOINTS
        .iter()
        .map(|path| {
            let url = format!("{}{}", base, path);
            let name = url.clone();
            let check = async move {
                eventually(&format!("check {}", url), CHECK_WITHIN, || {
                    client.expect_status(&url, 200)
                })
                .await
                .map(|_| ())
            };
            (name, check.boxed())
        })
        .collect()
}

/// Runs the endpoint checks against the instance at `api_base_url`: debug endpoints, OIDC
/// discovery, the login UI, the console environment, and gRPC health.
pub async fn check_accessibility(api_base_url: &str) -> Result<()> {
    let client = InsecureClient::new()?;
    let grpc = GrpcClient::new(api_base_url)?;
    let host = host_with_port(api_base_url)?;
    let client = &client;
    let grpc = &grpc;
    let host = host.as_str();

    let mut checks = status_checks(client, api_base_url);

    let discovery = format!("{}/.well-known/openid-configuration", api_base_url);
    checks.push((
        "well-known/openid-configuration".to_string(),
        async move {
            eventually("check OIDC discovery", CHECK_WITHIN, || async {
                let response = client.expect_status(&discovery, 200).await?;
                check_discovery_body(&response.body, host)
            })
            .await
        }
        .boxed(),
    ));

    let login = format!("{}/ui/v2/login", api_base_url);
    checks.push((
        "login page".to_string(),
        async move {
            eventually("check login page", CHECK_WITHIN, || {
                client.expect_below_500(&login)
            })
            .await
            .map(|_| ())
        }
        .boxed(),
    ));

    let environment = format!("{}/ui/console/assets/environment.json", api_base_url);
    checks.push((
        "environment.json".to_string(),
        async move {
            eventually("check environment.json", CHECK_WITHIN, || async {
                let response = client.expect_status(&environment, 200).await?;
                check_environment_body(&response.body, host)
            })
            .await
        }
        .boxed(),
    ));

    checks.push((
        "grpc health".to_string(),
        async move {
            eventually("check gRPC health", CHECK_WITHIN, || async {
                grpc.health().await?;
                grpc.management_healthz().await
            })
            .await
        }
        .boxed(),
    ));

    await_all(checks).await?;
    info!("'{}' is accessible", api_base_url);
    Ok(())
}

/// Forwards a local port to every ready ZITADEL pod of `release` and checks its debug endpoints.
/// Pods serve https when the chart generated a certificate for them.
pub async fn check_pod_endpoints(env: &Env, release: &str, tls: bool) -> Result<()> {
    let selector = format!("{}={},{}={}", APP_NAME, APP_NAME_ZITADEL, APP_INSTANCE, release);
    let pods = env
        .api::<Pod>()
        .list(&ListParams::default().labels(&selector))
        .await
        .context(error::KubeSnafu {
            action: format!("list pods with '{}'", selector),
        })?;
    let names: Vec<String> = pods
        .items
        .iter()
        .filter(|pod| pod_ready(pod))
        .filter_map(|pod| pod.metadata.name.clone())
        .collect();
    ensure!(
        !names.is_empty(),
        error::NotFoundSnafu {
            what: format!("ready pods for release '{}'", release),
        }
    );

    let kubectl = env.kubectl();
    let mut tunnels = Vec::new();
    for name in &names {
        tunnels.push(
            kubectl
                .port_forward(&format!("pod/{}", name), ZITADEL_POD_PORT)
                .await?,
        );
    }
    let client = InsecureClient::new()?;
    let scheme = if tls { "https" } else { "http" };
    let bases: Vec<String> = tunnels
        .iter()
        .map(|tunnel| format!("{}://{}", scheme, tunnel.endpoint()))
        .collect();
    let checks = bases
        .iter()
        .flat_map(|base| status_checks(&client, base))
        .collect();
    await_all(checks).await?;
    info!("Debug endpoints of pods {:?} are healthy", names);
    Ok(())
}

/// The console of ZITADEL Service `service` answers on https `port` with a `200` or a redirect
/// into the login flow. Redirects are not followed.
pub async fn check_console_through_service(env: &Env, service: &str, port: u16) -> Result<()> {
    check_through_service(
        env,
        service,
        port,
        "/ui/console",
        "200 or a login redirect",
        HttpResponse::is_ok_or_login_redirect,
    )
    .await
}

/// The login UI of Service `service` answers on https `port` with a `200`.
pub async fn check_login_ui_through_service(env: &Env, service: &str, port: u16) -> Result<()> {
    check_through_service(env, service, port, "/ui/v2/login", "200", |response| {
        response.status.as_u16() == 200
    })
    .await
}

async fn check_through_service(
    env: &Env,
    service: &str,
    port: u16,
    path: &str,
    expected: &str,
    accept: fn(&HttpResponse) -> bool,
) -> Result<()> {
    let tunnel = env
        .kubectl()
        .port_forward(&format!("svc/{}", service), port)
        .await?;
    let client = InsecureClient::without_redirects()?;
    let url = format!("https://{}{}", tunnel.endpoint(), path);
    Await::new(
        format!("check '{}' of service '{}'", path, service),
        Budget::Within(SERVICE_CHECK_WITHIN),
    )
    .interval(SERVICE_CHECK_INTERVAL)
    .run(|| async {
        let response = client.get(&url, None).await?;
        debug!(
            "'{}' answered {} (location {:?})",
            url, response.status, response.location
        );
        ensure!(
            accept(&response),
            error::HttpStatusSnafu {
                url: url.as_str(),
                expected,
                actual: response.status.as_u16(),
            }
        );
        Ok(())
    })
    .await?;
    info!("'{}' of service '{}' is accessible", path, service);
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
