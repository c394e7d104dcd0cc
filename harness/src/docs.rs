use crate::command::run_in;
use crate::error::{self, Result};
use log::info;
use snafu::{ensure, ResultExt};
use std::path::Path;

/// Where helm-docs looks for charts, relative to the repository root.
pub const CHART_SEARCH_ROOT: &str = "charts";

pub fn helm_docs_args() -> Vec<String> {
    vec![format!("--chart-search-root={}", CHART_SEARCH_ROOT)]
}

/// Runs helm-docs over the repository at `repo_root` and fails if that changes the `README.md` of
/// `chart`. The committed README is restored afterwards whatever helm-docs did to it.
pub async fn readme_in_sync(helm_docs: &str, repo_root: &Path, chart: &Path) -> Result<()> {
    let readme = chart.join("README.md");
    let committed = std::fs::read_to_string(&readme).context(error::FileSnafu { path: &readme })?;

    let output = run_in(helm_docs, &helm_docs_args(), Some(repo_root)).await;
    let regenerated = std::fs::read_to_string(&readme).context(error::FileSnafu { path: &readme });
    std::fs::write(&readme, &committed).context(error::IoSnafu {
        action: format!("restore '{}'", readme.display()),
    })?;

    let output = output?;
    ensure!(
        output.success,
        error::HelmDocsCommandSnafu {
            code: output.code,
            output: output.combined(),
        }
    );
    ensure!(
        committed == regenerated?,
        error::ReadmeOutOfSyncSnafu {
            chart,
            command: format!("{} {}", helm_docs, helm_docs_args().join(" ")),
        }
    );
    info!("README of '{}' is in sync", chart.display());
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    fn repo() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let chart = root.path().join(CHART_SEARCH_ROOT).join("zitadel");
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(chart.join("README.md"), "# zitadel\n").unwrap();
        root
    }

    #[tokio::test]
    async fn untouched_readme_is_in_sync() {
        let root = repo();
        let chart = root.path().join("charts/zitadel");
        readme_in_sync("true", root.path(), &chart).await.unwrap();
    }

    #[tokio::test]
    async fn failing_generator_is_reported() {
        let root = repo();
        let chart = root.path().join("charts/zitadel");
        let error = readme_in_sync("false", root.path(), &chart)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::HelmDocsCommand { .. }));
        assert_eq!(
            std::fs::read_to_string(chart.join("README.md")).unwrap(),
            "# zitadel\n"
        );
    }

    #[tokio::test]
    async fn missing_readme_is_a_file_error() {
        let root = tempfile::tempdir().unwrap();
        let error = readme_in_sync("true", root.path(), &root.path().join("charts/zitadel"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::File { .. }));
    }
}
