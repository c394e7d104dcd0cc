use crate::command::run;
use crate::error::{self, Result};
use log::{debug, info};
use snafu::{ensure, OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// How long `kubectl port-forward` may take to report that it is listening.
const PORT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and as whom `helm` and `kubectl` talk to the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubectlOptions {
    pub config_path: Option<PathBuf>,
    pub context: Option<String>,
    pub namespace: String,
}

impl KubectlOptions {
    /// Global flags in the spelling `helm` expects.
    pub fn helm_args(&self) -> Vec<String> {
        self.args("--kube-context")
    }

    /// Global flags in the spelling `kubectl` expects.
    pub fn kubectl_args(&self) -> Vec<String> {
        self.args("--context")
    }

    fn args(&self, context_flag: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.config_path {
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }
        if let Some(context) = &self.context {
            args.push(context_flag.to_string());
            args.push(context.clone());
        }
        if !self.namespace.is_empty() {
            args.push("--namespace".to_string());
            args.push(self.namespace.clone());
        }
        args
    }
}

/// A thin wrapper around the `kubectl` binary for the operations the kube client does not cover
/// conveniently.
#[derive(Debug, Clone)]
pub struct Kubectl {
    path: String,
    options: KubectlOptions,
}

impl Kubectl {
    pub fn new<S>(path: S, options: KubectlOptions) -> Self
    where
        S: Into<String>,
    {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn options(&self) -> &KubectlOptions {
        &self.options
    }

    /// Runs `kubectl` with the global flags followed by `args` and returns its stdout.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let mut full_args = self.options.kubectl_args();
        full_args.extend(args.iter().map(|arg| arg.to_string()));
        let output = run(&self.path, &full_args).await?;
        ensure!(
            output.success,
            error::KubectlCommandSnafu {
                args: full_args.join(" "),
                code: output.code,
                output: output.combined(),
            }
        );
        Ok(output.stdout)
    }

    pub async fn apply(&self, file: &Path) -> Result<()> {
        let file = file.display().to_string();
        self.run(&["apply", "-f", &file]).await?;
        Ok(())
    }

    /// Logs of a resource, e.g. `pod/db-postgresql-0` or `job/zitadel-test-setup`.
    pub async fn logs(&self, target: &str) -> Result<String> {
        self.run(&["logs", target, "--all-containers=true"]).await
    }

    /// The last `tail` lines of `container` in `pod`.
    pub async fn container_logs(&self, pod: &str, container: &str, tail: u32) -> Result<String> {
        let tail = format!("--tail={}", tail);
        self.run(&["logs", pod, "-c", container, &tail]).await
    }

    /// Forwards a local port chosen by kubectl to `remote_port` of `target` (e.g. `pod/name` or
    /// `svc/name`). The forward lives as long as the returned [`Tunnel`].
    pub async fn port_forward(&self, target: &str, remote_port: u16) -> Result<Tunnel> {
        let mut args = self.options.kubectl_args();
        args.push("port-forward".to_string());
        args.push(target.to_string());
        args.push(format!(":{}", remote_port));
        debug!("Starting 'kubectl {}'", args.join(" "));

        let mut child = Command::new(&self.path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context(error::ProcessSnafu { what: "kubectl" })?;
        let stdout = child.stdout.take().context(error::NotFoundSnafu {
            what: "port-forward stdout",
        })?;

        let mut lines = BufReader::new(stdout).lines();
        let local_port = tokio::time::timeout(PORT_FORWARD_TIMEOUT, async {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(port) = forwarded_port(&line) {
                    return Some(port);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .context(error::KubectlCommandSnafu {
            args: args.join(" "),
            code: 1,
            output: format!("port-forward to '{}' did not become ready", target),
        })?;
        // Keep draining so kubectl never writes into a closed pipe.
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
        info!(
            "Forwarding localhost:{} to {}:{}",
            local_port, target, remote_port
        );
        Ok(Tunnel {
            target: target.to_string(),
            local_port,
            _child: child,
        })
    }
}

/// The local port of a `Forwarding from 127.0.0.1:<port> -> <remote>` line.
fn forwarded_port(line: &str) -> Option<u16> {
    let address = line.strip_prefix("Forwarding from ")?.split(" -> ").next()?;
    address.rsplit_once(':')?.1.parse().ok()
}

/// A running `kubectl port-forward`. The child process is killed when the tunnel is dropped.
#[derive(Debug)]
pub struct Tunnel {
    target: String,
    local_port: u16,
    _child: Child,
}

impl Tunnel {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// `localhost:<port>`.
    pub fn endpoint(&self) -> String {
        format!("localhost:{}", self.local_port)
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
