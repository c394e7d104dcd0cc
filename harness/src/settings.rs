use crate::constants::DEFAULT_CHART_PATH;
use crate::error::{self, Result};
use serde::Deserialize;
use snafu::ResultExt;
use std::path::PathBuf;

/// Settings provide a way to send arguments into the harness using environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    ambient: Ambient,
    paths: Paths,
}

/// Variables that CI systems and developers already export.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Ambient {
    /// The commit under test. When set, it is appended to namespace names so that leftovers can be
    /// traced back to a CI run.
    github_sha: Option<String>,
    chrome_binary_path: Option<PathBuf>,
    chrome_path: Option<PathBuf>,
    debug: Option<String>,
    kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Paths {
    /// The path to the `helm` binary. Defaults to `helm` (i.e. found via `$PATH`).
    ///
    /// # Example
    ///
    /// ```text
    /// ZITADEL_HARNESS_HELM_PATH=/wherever/helm
    /// ```
    #[serde(default = "helm")]
    helm_path: String,
    /// The path to the `kubectl` binary. Defaults to `kubectl`.
    #[serde(default = "kubectl")]
    kubectl_path: String,
    /// The path to the `helm-docs` binary. Defaults to `helm-docs`.
    #[serde(default = "helm_docs")]
    helm_docs_path: String,
    /// The path to the chart under test, relative to the working directory.
    #[serde(default = "chart_path")]
    chart_path: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            helm_path: helm(),
            kubectl_path: kubectl(),
            helm_docs_path: helm_docs(),
            chart_path: chart_path(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_iter(std::env::vars())
    }

    /// Builds settings from an explicit set of variables instead of the process environment.
    pub fn from_iter<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let ambient = envy::from_iter::<_, Ambient>(vars.clone()).context(error::SettingsSnafu)?;
        let paths = envy::prefixed("ZITADEL_HARNESS_")
            .from_iter::<_, Paths>(vars)
            .context(error::SettingsSnafu)?;
        Ok(Self { ambient, paths })
    }

    pub fn github_sha(&self) -> Option<&str> {
        self.ambient
            .github_sha
            .as_deref()
            .map(str::trim)
            .filter(|sha| !sha.is_empty())
    }

    /// An explicit Chrome binary, `CHROME_BINARY_PATH` taking precedence over `CHROME_PATH`.
    pub fn chrome_binary(&self) -> Option<&PathBuf> {
        self.ambient
            .chrome_binary_path
            .as_ref()
            .or(self.ambient.chrome_path.as_ref())
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// `DEBUG` is enabled by any non-empty value other than `0` or `false`.
    pub fn debug(&self) -> bool {
        match self.ambient.debug.as_deref().map(str::trim) {
            None | Some("") | Some("0") => false,
            Some(value) => !value.eq_ignore_ascii_case("false"),
        }
    }

    pub fn kubeconfig(&self) -> Option<&PathBuf> {
        self.ambient.kubeconfig.as_ref()
    }

    pub fn helm_path(&self) -> &str {
        &self.paths.helm_path
    }

    pub fn kubectl_path(&self) -> &str {
        &self.paths.kubectl_path
    }

    pub fn helm_docs_path(&self) -> &str {
        &self.paths.helm_docs_path
    }

    pub fn chart_path(&self) -> &PathBuf {
        &self.paths.chart_path
    }
}

/// We need these to provide defaults for serde.
fn helm() -> String {
    String::from("helm")
}

fn kubectl() -> String {
    String::from("kubectl")
}

fn helm_docs() -> String {
    String::from("helm-docs")
}

fn chart_path() -> PathBuf {
    PathBuf::from(DEFAULT_CHART_PATH)
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
