/*!

A wrapper around the `helm` binary. Every invocation carries the kubeconfig, context and
namespace of the [`KubectlOptions`] it was built with. Non-zero exits become
[`Error::HelmCommand`](crate::Error::HelmCommand) with Helm's combined output attached.

!*/

use crate::command::{run, run_in, CommandOutput};
use crate::error::{self, Result};
use crate::kubectl::KubectlOptions;
use crate::values::HelmValues;
use log::{debug, info};
use snafu::ensure;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Helm's `--timeout` unless a caller asks for something else.
pub const DEFAULT_HELM_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Longer installs are cut to this.
pub const MAX_HELM_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Per-invocation chart options.
#[derive(Debug, Clone, Default)]
pub struct HelmOptions {
    pub set_values: HelmValues,
    pub values_files: Vec<PathBuf>,
    pub version: Option<String>,
    /// Added after everything else, e.g. `--wait` or `--hide-notes`.
    pub extra_args: Vec<String>,
}

impl HelmOptions {
    pub fn new(set_values: HelmValues) -> Self {
        Self {
            set_values,
            ..Default::default()
        }
    }

    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn values_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.values_files.push(path.into());
        self
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// `--wait --timeout <timeout>`, with the timeout capped at [`MAX_HELM_TIMEOUT`].
    pub fn wait(self, timeout: Duration) -> Self {
        let timeout = timeout.min(MAX_HELM_TIMEOUT);
        self.arg("--wait")
            .arg("--timeout")
            .arg(format!("{}s", timeout.as_secs()))
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for file in &self.values_files {
            args.push("--values".to_string());
            args.push(file.display().to_string());
        }
        args.extend(self.set_values.to_set_args());
        if let Some(version) = &self.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[derive(Debug, Clone)]
pub struct Helm {
    path: String,
    options: KubectlOptions,
}

impl Helm {
    pub fn new<S>(path: S, options: KubectlOptions) -> Self
    where
        S: Into<String>,
    {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn kubectl_options(&self) -> &KubectlOptions {
        &self.options
    }

    pub async fn repo_add(&self, name: &str, url: &str) -> Result<()> {
        self.run(vec![
            "repo".into(),
            "add".into(),
            name.into(),
            url.into(),
            "--force-update".into(),
        ])
        .await?;
        Ok(())
    }

    pub async fn install(&self, options: &HelmOptions, chart: &str, release: &str) -> Result<()> {
        info!("Installing release '{}' from '{}'", release, chart);
        let mut args = vec!["install".to_string(), release.into(), chart.into()];
        args.extend(self.options.helm_args());
        args.extend(options.args());
        self.run(args).await?;
        Ok(())
    }

    pub async fn upgrade_install(
        &self,
        options: &HelmOptions,
        chart: &str,
        release: &str,
    ) -> Result<()> {
        info!("Upgrading or installing release '{}' from '{}'", release, chart);
        let mut args = vec![
            "upgrade".to_string(),
            "--install".into(),
            release.into(),
            chart.into(),
        ];
        args.extend(self.options.helm_args());
        args.extend(options.args());
        self.run(args).await?;
        Ok(())
    }

    pub async fn uninstall(&self, release: &str, wait: bool) -> Result<()> {
        info!("Uninstalling release '{}'", release);
        let mut args = vec!["uninstall".to_string(), release.into()];
        args.extend(self.options.helm_args());
        if wait {
            args.push("--wait".into());
        }
        self.run(args).await?;
        Ok(())
    }

    /// Renders `templates` (paths relative to the chart, e.g. `templates/service.yaml`) and returns
    /// the manifests.
    pub async fn template(
        &self,
        options: &HelmOptions,
        chart: &str,
        release: &str,
        templates: &[&str],
    ) -> Result<String> {
        let mut args = vec!["template".to_string(), release.into(), chart.into()];
        args.extend(self.options.helm_args());
        for template in templates {
            args.push("--show-only".into());
            args.push(template.to_string());
        }
        args.extend(options.args());
        Ok(self.run(args).await?.stdout)
    }

    /// Runs the `helm schema` plugin in `chart_dir` with `args`.
    pub async fn schema(&self, chart_dir: &Path, args: &[String]) -> Result<()> {
        let mut full_args = vec!["schema".to_string()];
        full_args.extend(args.iter().cloned());
        debug!("Running 'helm {}' in '{}'", full_args.join(" "), chart_dir.display());
        let output = run_in(&self.path, &full_args, Some(chart_dir)).await?;
        check(&full_args, output).map(|_| ())
    }

    async fn run(&self, args: Vec<String>) -> Result<CommandOutput> {
        debug!("Running 'helm {}'", args.join(" "));
        let output = run(&self.path, &args).await?;
        check(&args, output)
    }
}

fn check(args: &[String], output: CommandOutput) -> Result<CommandOutput> {
    ensure!(
        output.success,
        error::HelmCommandSnafu {
            args: args.join(" "),
            code: output.code,
            output: output.combined(),
        }
    );
    Ok(output)
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
