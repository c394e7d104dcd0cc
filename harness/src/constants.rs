/// Helper macro to avoid retyping the ZITADEL base name when creating further string constants
/// from it. When given no parameters, this returns the base name. When given a string literal
/// parameter it adds `-parameter` to the end.
macro_rules! zitadel {
    () => {
        "zitadel"
    };
    ($s:literal) => {
        concat!(zitadel!(), "-", $s)
    };
}

// Release and chart identifiers
pub const APP_NAME_ZITADEL: &str = zitadel!();
pub const APP_NAME_LOGIN: &str = zitadel!("login");
pub const ZITADEL_RELEASE: &str = zitadel!("test");
pub const DB_RELEASE: &str = "db";
pub const DB_SERVICE: &str = "db-postgresql";
pub const DB_POD: &str = "db-postgresql-0";
pub const DEFAULT_MASTERKEY: &str = "x123456789012345678901234567891y";
pub const DEFAULT_CHART_PATH: &str = "charts/zitadel";

// Name limits https://kubernetes.io/docs/concepts/overview/working-with-objects/names/
pub const MAX_NAMESPACE_LEN: usize = 63;
pub const MAX_RELEASE_LEN: usize = 53;
pub const UNIQUE_ID_LEN: usize = 6;

// Standard labels https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
pub const APP_NAME: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE: &str = "app.kubernetes.io/instance";
pub const APP_VERSION: &str = "app.kubernetes.io/version";
pub const APP_COMPONENT: &str = "app.kubernetes.io/component";
pub const APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// Helm annotations
pub const HELM_HOOK: &str = "helm.sh/hook";
pub const HELM_HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
pub const HELM_HOOK_WEIGHT: &str = "helm.sh/hook-weight";

// Data keys
pub const MASTERKEY_KEY: &str = "masterkey";
pub const PAT_KEY: &str = "pat";

// Login flow
pub const INITIAL_PASSWORD: &str = "Password1!";
pub const CHANGED_PASSWORD: &str = "Password2!";
pub const LOGIN_FAILURES_DIR: &str = ".login-failures";

// OAuth
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const ZITADEL_SCOPES: &str = "openid profile email urn:zitadel:iam:org:project:id:zitadel:aud";

#[test]
fn zitadel_constants_macro_test() {
    assert_eq!("zitadel", zitadel!());
    assert_eq!("zitadel-test", ZITADEL_RELEASE);
    assert_eq!("zitadel-login", APP_NAME_LOGIN);
}
