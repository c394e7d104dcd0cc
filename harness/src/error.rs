use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the harness.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to {}: {} attempts over {:?} failed, last error: {}", what, attempts, elapsed, source))]
    AwaitExhausted {
        what: String,
        attempts: u32,
        elapsed: Duration,
        source: Box<Error>,
    },

    #[snafu(display("Unable to launch browser: {}", message))]
    BrowserConfig { message: String },

    #[snafu(display("Browser action '{}' failed: {}", action, source))]
    Browser {
        action: String,
        source: chromiumoxide::error::CdpError,
    },

    #[snafu(display("Unable to generate certificate: {}", source))]
    Certificate { source: rcgen::Error },

    #[snafu(display("Unable to create client: {}", source))]
    ClientCreateKubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to read kubeconfig: {}", source))]
    ConfigRead {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Error creating {}: {}", what, source))]
    Create { what: String, source: kube::Error },

    #[snafu(display("Expected {} to contain '{}'", what, needle))]
    ContentMissing { what: String, needle: String },

    #[snafu(display("Unable to read file '{}': {}", path.display(), source))]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("gRPC health check returned non-serving status {}", status))]
    GrpcNotServing { status: i32 },

    #[snafu(display("gRPC call '{}' failed: {}", method, source))]
    GrpcStatus {
        method: String,
        source: tonic::Status,
    },

    #[snafu(display("'helm {}' failed with exit status '{}'\n\n{}", args, code, output))]
    HelmCommand {
        args: String,
        code: i32,
        output: String,
    },

    #[snafu(display("'helm-docs' failed with exit status '{}'\n\n{}", code, output))]
    HelmDocsCommand { code: i32, output: String },

    #[snafu(display("Request to '{}' failed: {}", url, source))]
    Http { url: String, source: reqwest::Error },

    #[snafu(display("Unable to build HTTP client: {}", source))]
    HttpClient { source: reqwest::Error },

    #[snafu(display("Expected status {} from '{}' but got {}", expected, url, actual))]
    HttpStatus {
        url: String,
        expected: String,
        actual: u16,
    },

    #[snafu(display("Invalid URI '{}': {}", uri, source))]
    InvalidUri {
        uri: String,
        source: http::uri::InvalidUri,
    },

    #[snafu(display("Invalid gRPC metadata value: {}", source))]
    InvalidMetadata {
        source: tonic::metadata::errors::InvalidMetadataValue,
    },

    #[snafu(display("Invalid URL '{}': {}", url, source))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("Unable to {}: {}", action, source))]
    Io {
        action: String,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse {}: {}", what, source))]
    JsonParse {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to sign JWT profile assertion: {}", source))]
    Jwt { source: jsonwebtoken::errors::Error },

    #[snafu(display("Unable to {}: {}", action, source))]
    Kube { action: String, source: kube::Error },

    #[snafu(display("'kubectl {}' failed with exit status '{}'\n\n{}", args, code, output))]
    KubectlCommand {
        args: String,
        code: i32,
        output: String,
    },

    #[snafu(display("'{}' did not finish within {:?}", what, timeout))]
    Timeout { what: String, timeout: Duration },

    #[snafu(display("Unexpected resources remain after uninstall: {:?}", resources))]
    Leftovers { resources: Vec<String> },

    #[snafu(display("{} mismatch: expected {} but got {}", what, expected, actual))]
    Mismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[snafu(display("Key '{}' is missing or empty in secret '{}'", key, secret))]
    MissingKey { secret: String, key: String },

    #[snafu(display("Unable to find {}", what))]
    NotFound { what: String },

    #[snafu(display("{} is not ready yet", what))]
    NotReady { what: String },

    #[snafu(display("Expected {} to be absent but it exists", what))]
    Present { what: String },

    #[snafu(display("Failed to create '{}' process: {}", what, source))]
    Process {
        what: String,
        source: std::io::Error,
    },

    #[snafu(display("README.md of '{}' is out of sync with values.yaml, regenerate it with '{}'", chart.display(), command))]
    ReadmeOutOfSync { chart: PathBuf, command: String },

    #[snafu(display("Values schema is out of sync with values.yaml, regenerate it with 'helm {}'", args))]
    SchemaOutOfSync { args: String },

    #[snafu(display("Unable to parse {} as YAML: {}", what, source))]
    SerdeYaml {
        what: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Error parsing settings from environment variables: {}", source))]
    Settings { source: envy::Error },

    #[snafu(display("Expected '{}' to fail with '{}' but it succeeded", what, needle))]
    UnexpectedSuccess { what: String, needle: String },

    #[snafu(display("Expected '{}' to fail with '{}' but it failed with: {}", what, needle, source))]
    UnexpectedFailure {
        what: String,
        needle: String,
        source: Box<Error>,
    },

    #[snafu(display("Values schema has untyped fields: {:?}", paths))]
    UntypedSchema { paths: Vec<String> },
}

impl Error {
    /// The combined output of a failed `helm` invocation, if this error came from one. Errors
    /// wrapped by an await are unwrapped to the last attempt.
    pub fn helm_output(&self) -> Option<&str> {
        match self {
            Error::HelmCommand { output, .. } => Some(output),
            Error::AwaitExhausted { source, .. } => source.helm_output(),
            _ => None,
        }
    }
}
