use crate::assertions::{get, secret_value};
use crate::constants::{GRANT_TYPE_JWT_BEARER, ZITADEL_SCOPES};
use crate::env::Env;
use crate::error::{self, Result};
use crate::grpc::GrpcClient;
use crate::http::InsecureClient;
use crate::wait::eventually;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use k8s_openapi::api::core::v1::Secret;
use log::info;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::time::Duration;

/// How long the token exchange and the authenticated calls are retried.
pub const AUTH_WITHIN: Duration = Duration::from_secs(60);

/// The key file the setup job stores for a machine user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub key_id: String,
    /// PEM encoded RSA private key.
    pub key: String,
    pub user_id: String,
}

impl MachineKey {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context(error::JsonParseSnafu {
            what: "machine key",
        })
    }
}

/// Claims of a JWT profile assertion (RFC 7523).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

impl AssertionClaims {
    /// Claims for `key` valid for one hour from `now`, a unix timestamp.
    pub fn new(key: &MachineKey, audience: &str, now: i64) -> Self {
        Self {
            iss: key.user_id.clone(),
            sub: key.user_id.clone(),
            aud: vec![audience.to_string()],
            iat: now,
            exp: now + ChronoDuration::hours(1).num_seconds(),
        }
    }
}

/// Reads and parses the machine key stored under `key` in Secret `secret`.
pub async fn read_machine_key(env: &Env, secret: &str, key: &str) -> Result<MachineKey> {
    let secret = get::<Secret>(env, secret).await?;
    MachineKey::from_slice(secret_value(&secret, key)?)
}

/// Signs an RS256 JWT profile assertion for `key` with `api_base_url` as the audience.
pub fn jwt_profile_assertion(key: &MachineKey, api_base_url: &str) -> Result<String> {
    let header = Header {
        kid: Some(key.key_id.clone()),
        ..Header::new(Algorithm::RS256)
    };
    let claims = AssertionClaims::new(key, api_base_url, Utc::now().timestamp());
    let signing_key = EncodingKey::from_rsa_pem(key.key.as_bytes()).context(error::JwtSnafu)?;
    encode(&header, &claims, &signing_key).context(error::JwtSnafu)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges `assertion` for an access token at `/oauth/v2/token`.
pub async fn fetch_token(client: &InsecureClient, api_base_url: &str, assertion: &str) -> Result<String> {
    let url = format!("{}/oauth/v2/token", api_base_url);
    let response = client
        .post_form(
            &url,
            &[
                ("grant_type", GRANT_TYPE_JWT_BEARER),
                ("scope", ZITADEL_SCOPES),
                ("assertion", assertion),
            ],
        )
        .await?;
    ensure!(
        response.status.as_u16() == 200,
        error::HttpStatusSnafu {
            url: url.clone(),
            expected: "200",
            actual: response.status.as_u16(),
        }
    );
    let token: TokenResponse = serde_json::from_str(&response.body).context(error::JsonParseSnafu {
        what: "token response",
    })?;
    Ok(token.access_token)
}

/// `GET /management/v1/languages` with `token`.
pub async fn call_authenticated_http(client: &InsecureClient, api_base_url: &str, token: &str) -> Result<()> {
    let url = format!("{}/management/v1/languages", api_base_url);
    let response = client.get(&url, Some(token)).await?;
    ensure!(
        response.status.as_u16() == 200,
        error::HttpStatusSnafu {
            url,
            expected: "200",
            actual: response.status.as_u16(),
        }
    );
    Ok(())
}

/// Authenticates as the machine user whose key is stored in `secret` under `key` and calls the
/// management API over HTTP and gRPC.
pub async fn check_authenticated_api(
    env: &Env,
    api_base_url: &str,
    secret: &str,
    key: &str,
) -> Result<()> {
    let machine_key = read_machine_key(env, secret, key).await?;
    let assertion = jwt_profile_assertion(&machine_key, api_base_url)?;
    let client = InsecureClient::new()?;

    let token = eventually("get access token", AUTH_WITHIN, || {
        fetch_token(&client, api_base_url, &assertion)
    })
    .await?;

    let grpc = GrpcClient::new(api_base_url)?;
    eventually("call authenticated endpoints", AUTH_WITHIN, || async {
        call_authenticated_http(&client, api_base_url, &token).await?;
        grpc.supported_languages(&token).await
    })
    .await?;
    info!(
        "Authenticated HTTP and gRPC calls succeeded for user '{}'",
        machine_key.user_id
    );
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
