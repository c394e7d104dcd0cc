/*!

The browser-driven first login of the ZITADEL admin user.

A headless Chrome with a throwaway profile opens the console with a login hint, signs in with the
initial password, changes it, skips the MFA prompt if one is shown, and waits for the console's
welcome banner. Each step has its own timeout inside [`LOGIN_TIMEOUT`]. When a step fails the page
HTML and a full-page screenshot are written to `.login-failures/<test>/<step>_fail.{html,png}`.

!*/

use crate::constants::{CHANGED_PASSWORD, INITIAL_PASSWORD, LOGIN_FAILURES_DIR};
use crate::error::{self, Error, Result};
use crate::settings::Settings;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use snafu::{OptionExt, ResultExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const PATH_TIMEOUT: Duration = Duration::from_secs(15);
const SETTLE: Duration = Duration::from_secs(10);

/// Where Chrome is usually installed, checked after the configured binary.
pub const WELL_KNOWN_CHROME_PATHS: [&str; 7] = [
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/chrome",
];

/// The first candidate for which `exists` holds, starting with `configured`.
pub fn find_chrome<F>(configured: Option<&Path>, exists: F) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    configured
        .into_iter()
        .map(Path::to_path_buf)
        .chain(WELL_KNOWN_CHROME_PATHS.iter().map(PathBuf::from))
        .filter(|path| !path.as_os_str().is_empty())
        .find(|path| exists(path))
}

/// Lexically cleans a URL path: repeated slashes, `.` and `..` segments, and a trailing slash are
/// removed. An empty path cleans to `/`.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

pub fn test_id(id: &str) -> String {
    format!("[data-testid='{}']", id)
}

/// `test` with characters that do not belong in a file name replaced.
pub fn artifact_prefix(test: &str) -> String {
    test.replace(['/', ':', ' '], "_")
}

fn visible_js(selector: &str) -> String {
    format!(
        r#"(() => {{
            const e = document.querySelector("{}");
            if (!e) return false;
            const s = window.getComputedStyle(e);
            const r = e.getBoundingClientRect();
            return s.visibility !== "hidden" && s.display !== "none" && r.width > 0 && r.height > 0;
        }})()"#,
        selector.replace('"', "\\\"")
    )
}

fn enabled_js(selector: &str) -> String {
    format!(
        r#"(() => {{
            const e = document.querySelector("{}");
            return !!e && !e.disabled;
        }})()"#,
        selector.replace('"', "\\\"")
    )
}

/// A running browser with a single page.
struct Session {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    failures_dir: PathBuf,
}

impl Session {
    async fn launch(settings: &Settings, profile: &Path, failures_dir: PathBuf) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile)
            .no_sandbox()
            .arg("--ignore-certificate-errors")
            .arg("--incognito")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .request_timeout(Duration::from_secs(60));
        let configured = settings.chrome_binary().map(PathBuf::as_path);
        if let Some(chrome) = find_chrome(configured, Path::exists) {
            debug!("Using browser at '{}'", chrome.display());
            builder = builder.chrome_executable(chrome);
        }
        if settings.debug() {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }
        let config = builder
            .build()
            .map_err(|message| Error::BrowserConfig { message })?;

        let (browser, mut events) = Browser::launch(config).await.context(error::BrowserSnafu {
            action: "launch",
        })?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    trace!("Browser event error: {}", e);
                }
            }
        });
        let page = browser
            .new_page("about:blank")
            .await
            .context(error::BrowserSnafu { action: "open page" })?;
        Ok(Self {
            browser,
            page,
            handler,
            failures_dir,
        })
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Unable to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }
        self.handler.abort();
    }

    /// Runs `action` within `timeout`, saving failure artifacts named after `step` when it fails.
    async fn step<T, F>(&self, step: &str, timeout: Duration, action: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        info!("Login step '{}'", step);
        let result = match tokio::time::timeout(timeout, action).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                what: format!("login step '{}'", step),
                timeout,
            }),
        };
        if result.is_err() {
            self.save_failure(step).await;
        }
        result
    }

    async fn save_failure(&self, step: &str) {
        if let Err(e) = tokio::fs::create_dir_all(&self.failures_dir).await {
            warn!(
                "Unable to create '{}': {}",
                self.failures_dir.display(),
                e
            );
            return;
        }
        let prefix = self
            .failures_dir
            .join(format!("{}_fail", artifact_prefix(step)));
        match self.page.content().await {
            Ok(html) => write_artifact(&prefix.with_extension("html"), html.as_bytes()).await,
            Err(e) => warn!("Unable to read page content: {}", e),
        }
        let params = ScreenshotParams::builder().full_page(true).build();
        match self.page.screenshot(params).await {
            Ok(png) => write_artifact(&prefix.with_extension("png"), &png).await,
            Err(e) => warn!("Unable to take screenshot: {}", e),
        }
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .context(error::BrowserSnafu {
                action: format!("navigate to '{}'", url),
            })?;
        Ok(())
    }

    async fn poll_js(&self, script: String, what: &str) -> Result<()> {
        loop {
            let done = self
                .page
                .evaluate(script.as_str())
                .await
                .context(error::BrowserSnafu {
                    action: format!("evaluate {}", what),
                })?
                .into_value::<bool>()
                .context(error::JsonParseSnafu { what })?;
            if done {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_visible(&self, selector: &str) -> Result<()> {
        self.poll_js(visible_js(selector), &format!("visibility of {}", selector))
            .await
    }

    async fn wait_enabled(&self, selector: &str) -> Result<()> {
        self.poll_js(enabled_js(selector), &format!("state of {}", selector))
            .await
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<()> {
        let action = format!("type into {}", selector);
        self.page
            .find_element(selector)
            .await
            .context(error::BrowserSnafu {
                action: action.clone(),
            })?
            .click()
            .await
            .context(error::BrowserSnafu {
                action: action.clone(),
            })?
            .type_str(text)
            .await
            .context(error::BrowserSnafu { action })?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let action = format!("click {}", selector);
        self.page
            .find_element(selector)
            .await
            .context(error::BrowserSnafu {
                action: action.clone(),
            })?
            .click()
            .await
            .context(error::BrowserSnafu { action })?;
        Ok(())
    }

    async fn location(&self) -> Result<String> {
        self.page
            .url()
            .await
            .context(error::BrowserSnafu { action: "read location" })?
            .context(error::NotFoundSnafu {
                what: "page location",
            })
    }

    /// Polls the location until its cleaned path equals the cleaned `path`.
    async fn wait_for_path(&self, path: &str, timeout: Duration) -> Result<()> {
        let expected = clean_path(path);
        let poll = async {
            loop {
                let location = self.location().await?;
                let current = Url::parse(&location)
                    .map(|url| clean_path(url.path()))
                    .unwrap_or_default();
                if current == expected {
                    return Ok(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| Error::Timeout {
                what: format!("path '{}'", path),
                timeout,
            })?
    }
}

async fn write_artifact(path: &Path, data: &[u8]) {
    match tokio::fs::write(path, data).await {
        Ok(()) => info!("Saved '{}'", path.display()),
        Err(e) => warn!("Unable to write '{}': {}", path.display(), e),
    }
}

/// `<api_base_url>/ui/console` with `login_hint` as an encoded query parameter.
pub fn console_url(api_base_url: &str, login_hint: &str) -> Result<String> {
    let mut url = Url::parse(api_base_url).context(error::InvalidUrlSnafu { url: api_base_url })?;
    url.set_path("/ui/console");
    url.query_pairs_mut().append_pair("login_hint", login_hint);
    Ok(url.to_string())
}

/// Logs in as the default admin of the instance at `api_base_url`, changing its password from
/// `Password1!` to `Password2!`. `test_name` names the failure artifact directory.
pub async fn check_login(settings: &Settings, test_name: &str, api_base_url: &str) -> Result<()> {
    let url = Url::parse(api_base_url).context(error::InvalidUrlSnafu { url: api_base_url })?;
    let host = url.host_str().unwrap_or_default();
    let login_hint = format!("zitadel-admin@zitadel.{}", host);
    let failures_dir = Path::new(LOGIN_FAILURES_DIR).join(artifact_prefix(test_name));

    let profile = tempfile::Builder::new()
        .prefix("chrome-login-")
        .tempdir()
        .context(error::IoSnafu {
            action: "create browser profile directory",
        })?;
    let session = Session::launch(settings, profile.path(), failures_dir).await?;
    let result = tokio::time::timeout(
        LOGIN_TIMEOUT,
        login(&session, api_base_url, &login_hint),
    )
    .await
    .unwrap_or_else(|_| {
        Err(Error::Timeout {
            what: "browser login".to_string(),
            timeout: LOGIN_TIMEOUT,
        })
    });
    session.close().await;
    if let Err(e) = profile.close() {
        debug!("Unable to remove browser profile: {}", e);
    }
    result
}

async fn login(session: &Session, api_base_url: &str, login_hint: &str) -> Result<()> {
    let password = test_id("password-text-input");
    let change = test_id("password-change-text-input");
    let confirm = test_id("password-change-confirm-text-input");
    let submit = test_id("submit-button");

    let console = console_url(api_base_url, login_hint)?;
    session
        .step("navigate", Duration::from_secs(60), session.goto(&console))
        .await?;

    session
        .step(
            "await password page",
            Duration::from_secs(30),
            session.wait_visible(&password),
        )
        .await?;

    session
        .step("enter password", Duration::from_secs(30), async {
            session.type_into(&password, INITIAL_PASSWORD).await?;
            session.click(&submit).await
        })
        .await?;

    let location = session
        .step("change password", Duration::from_secs(60), async {
            session
                .wait_for_path("/ui/v2/login/password/change", PATH_TIMEOUT)
                .await?;
            session.wait_visible(&change).await?;
            session.wait_visible(&confirm).await?;
            session.type_into(&change, CHANGED_PASSWORD).await?;
            session.type_into(&confirm, CHANGED_PASSWORD).await?;
            session.wait_enabled(&submit).await?;
            session.click(&submit).await?;
            tokio::time::sleep(SETTLE).await;
            session.location().await
        })
        .await?;

    if location.contains("/ui/console") {
        info!("Redirected directly to the console, no MFA prompt");
    } else {
        let reset = test_id("reset-button");
        session
            .step("skip mfa", Duration::from_secs(30), async {
                session
                    .wait_for_path("/ui/v2/login/mfa/set", PATH_TIMEOUT)
                    .await?;
                session.wait_visible(&reset).await?;
                session.click(&reset).await
            })
            .await?;
    }

    session
        .step("show console", Duration::from_secs(60), async {
            session.wait_for_path("/ui/console", PATH_TIMEOUT).await?;
            session
                .wait_visible("[data-e2e='authenticated-welcome']")
                .await
        })
        .await?;
    info!("Logged in to the console at '{}'", api_base_url);
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
