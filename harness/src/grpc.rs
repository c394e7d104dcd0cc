/*!

Plain gRPC calls against a ZITADEL instance. The instance usually serves a self-signed certificate,
so the channel is a `hyper` HTTP/2 client with certificate verification turned off. Messages are
encoded with `prost`'s unit type, which stands in for `google.protobuf.Empty` and skips every
field of a response.

!*/

use crate::error::{self, Error, Result};
use crate::http::REQUEST_TIMEOUT;
use http::uri::PathAndQuery;
use http::Uri;
use hyper::client::HttpConnector;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use log::debug;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use snafu::{ensure, ResultExt};
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;
use tonic::body::BoxBody;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::metadata::MetadataValue;
use tonic::{Code, Request, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use url::Url;

pub const MANAGEMENT_HEALTHZ: &str = "/zitadel.management.v1.ManagementService/Healthz";
pub const MANAGEMENT_SUPPORTED_LANGUAGES: &str =
    "/zitadel.management.v1.ManagementService/GetSupportedLanguages";

type Channel = hyper::Client<HttpsConnector<HttpConnector>, BoxBody>;

struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// The `scheme://host:port` a gRPC client dials for `api_base_url`. A missing port defaults to 443
/// for https and 80 otherwise.
pub fn grpc_origin(api_base_url: &str) -> Result<Uri> {
    let url = Url::parse(api_base_url).context(error::InvalidUrlSnafu { url: api_base_url })?;
    let host = url.host_str().unwrap_or_default();
    let port = url
        .port_or_known_default()
        .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
    let origin = format!("{}://{}:{}", url.scheme(), host, port);
    origin
        .parse::<Uri>()
        .context(error::InvalidUriSnafu { uri: origin.clone() })
}

/// A client for one ZITADEL API origin.
#[derive(Clone)]
pub struct GrpcClient {
    origin: Uri,
    channel: Channel,
}

impl std::fmt::Debug for GrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClient")
            .field("origin", &self.origin)
            .finish()
    }
}

impl GrpcClient {
    pub fn new(api_base_url: &str) -> Result<Self> {
        let origin = grpc_origin(api_base_url)?;
        let tls = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http2()
            .build();
        let channel = hyper::Client::builder().http2_only(true).build(connector);
        Ok(Self { origin, channel })
    }

    pub fn origin(&self) -> &Uri {
        &self.origin
    }

    /// `grpc.health.v1.Health/Check` for the whole server. An `Unimplemented` answer still proves
    /// that the server speaks gRPC and is accepted.
    pub async fn health(&self) -> Result<()> {
        let mut client = HealthClient::with_origin(self.channel.clone(), self.origin.clone());
        let response = with_timeout(
            "grpc.health.v1.Health/Check",
            client.check(HealthCheckRequest {
                service: String::new(),
            }),
        )
        .await?;
        let status = match response {
            Ok(response) => response.into_inner().status,
            Err(status) if status.code() == Code::Unimplemented => {
                debug!("Health service is not implemented at '{}'", self.origin);
                return Ok(());
            }
            Err(source) => {
                return Err(Error::GrpcStatus {
                    method: "grpc.health.v1.Health/Check".to_string(),
                    source,
                })
            }
        };
        ensure!(
            status == ServingStatus::Serving as i32,
            error::GrpcNotServingSnafu { status }
        );
        Ok(())
    }

    /// The unauthenticated management health endpoint.
    pub async fn management_healthz(&self) -> Result<()> {
        self.unary(MANAGEMENT_HEALTHZ, None).await
    }

    /// An authenticated management call that needs a valid `token`.
    pub async fn supported_languages(&self, token: &str) -> Result<()> {
        self.unary(MANAGEMENT_SUPPORTED_LANGUAGES, Some(token)).await
    }

    /// Calls `method` with an empty request and discards the response.
    pub async fn unary(&self, method: &'static str, bearer: Option<&str>) -> Result<()> {
        let mut request = Request::new(());
        if let Some(token) = bearer {
            let value = format!("Bearer {}", token)
                .parse::<MetadataValue<_>>()
                .context(error::InvalidMetadataSnafu)?;
            request.metadata_mut().insert("authorization", value);
        }
        let mut grpc = Grpc::with_origin(self.channel.clone(), self.origin.clone());
        let call = async move {
            grpc.ready()
                .await
                .map_err(|e| Status::unavailable(format!("channel not ready: {}", e)))?;
            let codec: ProstCodec<(), ()> = ProstCodec::default();
            grpc.unary(request, PathAndQuery::from_static(method), codec)
                .await
        };
        with_timeout(method, call)
            .await?
            .context(error::GrpcStatusSnafu { method })?;
        Ok(())
    }
}

async fn with_timeout<T, F>(what: &str, call: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(REQUEST_TIMEOUT, call)
        .await
        .map_err(|_| Error::Timeout {
            what: what.to_string(),
            timeout: REQUEST_TIMEOUT,
        })
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;

    fn authority(url: &str) -> String {
        let origin = grpc_origin(url).unwrap();
        format!(
            "{}://{}",
            origin.scheme_str().unwrap(),
            origin.authority().unwrap()
        )
    }

    #[test]
    fn origin_defaults_port() {
        assert_eq!(
            authority("https://pg-insecure.127.0.0.1.sslip.io"),
            "https://pg-insecure.127.0.0.1.sslip.io:443"
        );
        assert_eq!(authority("http://localhost"), "http://localhost:80");
        assert_eq!(
            authority("https://localhost:8443/ui/console"),
            "https://localhost:8443"
        );
    }

    #[test]
    fn origin_rejects_garbage() {
        assert!(matches!(
            grpc_origin("not a url"),
            Err(Error::InvalidUrl { .. })
        ));
    }
}
