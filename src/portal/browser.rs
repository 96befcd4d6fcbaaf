use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{LoginSelectors, PortalConfig};
use crate::error::{BotError, Result};
use crate::portal::traits::Authenticator;
use crate::portal::types::{BrowserCookie, LoginArtifacts};

/// What the worker thread needs to drive a login, owned by that thread
#[derive(Debug, Clone)]
struct LoginSettings {
    login_url: String,
    selectors: LoginSelectors,
    timeout: Duration,
    headless: bool,
}

enum Command {
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Login {
        username: String,
        password: String,
        reply: oneshot::Sender<Result<LoginArtifacts>>,
    },
    Shutdown,
}

/// Headless Chrome owned by a single dedicated thread.
///
/// The `Browser` handle never leaves the worker; callers talk to it over a
/// channel. Dropping the authenticator shuts the browser down and joins the
/// thread.
pub struct ChromeAuthenticator {
    tx: mpsc::Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChromeAuthenticator {
    /// Spawn the browser worker. The browser itself is launched by `start`.
    pub fn new(config: &PortalConfig) -> Result<Self> {
        let settings = LoginSettings {
            login_url: config.login_url()?.to_string(),
            selectors: config.selectors.clone(),
            timeout: config.login_timeout,
            headless: config.headless,
        };

        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("browser-worker".to_string())
            .spawn(move || worker_loop(rx, settings))
            .map_err(|e| BotError::Browser(format!("failed to spawn browser worker: {e}")))?;

        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| BotError::Browser("browser worker is not running".to_string()))
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().ok().and_then(|mut guard| guard.take())
    }
}

#[async_trait]
impl Authenticator for ChromeAuthenticator {
    async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply })?;
        rx.await
            .map_err(|_| BotError::Browser("browser worker stopped during start".to_string()))?
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginArtifacts> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Login {
            username: username.to_string(),
            password: password.to_string(),
            reply,
        })?;
        rx.await
            .map_err(|_| BotError::Browser("browser worker stopped during login".to_string()))?
    }

    async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.take_handle() {
            if tokio::task::spawn_blocking(move || handle.join()).await.is_err() {
                warn!("Browser worker did not shut down cleanly");
            }
        }
    }
}

impl Drop for ChromeAuthenticator {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.take_handle() {
            if handle.join().is_err() {
                warn!("Browser worker panicked");
            }
        }
    }
}

fn worker_loop(rx: mpsc::Receiver<Command>, settings: LoginSettings) {
    let mut browser: Option<Browser> = None;

    while let Ok(command) = rx.recv() {
        match command {
            Command::Start { reply } => {
                let result = if browser.is_some() {
                    warn!("Browser already started, ignoring second start");
                    Ok(())
                } else {
                    launch(settings.headless).map(|launched| {
                        browser = Some(launched);
                    })
                };
                let _ = reply.send(result);
            }
            Command::Login {
                username,
                password,
                reply,
            } => {
                let result = match browser.as_ref() {
                    Some(browser) => drive_login(browser, &settings, &username, &password),
                    None => Err(BotError::Browser(
                        "browser must be started before login".to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }

    if browser.take().is_some() {
        info!("Shutting down browser");
    }
}

fn launch(headless: bool) -> Result<Browser> {
    info!("Launching headless Chrome...");

    let options = LaunchOptions::default_builder()
        .headless(headless)
        .build()
        .map_err(|e| BotError::Browser(format!("failed to build launch options: {e}")))?;

    Browser::new(options).map_err(|e| BotError::Browser(format!("failed to launch Chrome: {e:#}")))
}

fn browser_err(action: &str) -> impl Fn(anyhow::Error) -> BotError + '_ {
    move |e| BotError::Browser(format!("{action}: {e:#}"))
}

fn drive_login(
    browser: &Browser,
    settings: &LoginSettings,
    username: &str,
    password: &str,
) -> Result<LoginArtifacts> {
    info!("Attempting to log in as {}...", username);

    let tab = browser.new_tab().map_err(browser_err("failed to open tab"))?;
    let artifacts = release_after(
        tab.as_ref(),
        |tab| fill_login_form(browser, tab, settings, username, password),
        |tab| {
            if let Err(e) = tab.close(true) {
                debug!("Could not close login tab: {}", e);
            }
        },
    )?;

    info!("Login successful.");
    Ok(artifacts)
}

fn fill_login_form(
    browser: &Browser,
    tab: &Tab,
    settings: &LoginSettings,
    username: &str,
    password: &str,
) -> Result<LoginArtifacts> {
    let selectors = &settings.selectors;

    tab.navigate_to(&settings.login_url)
        .map_err(browser_err("failed to open login page"))?;
    tab.wait_until_navigated()
        .map_err(|_| BotError::AuthTimeout { stage: "login page" })?;

    let username_field = tab
        .wait_for_element_with_custom_timeout(&selectors.username, settings.timeout)
        .map_err(|_| BotError::AuthTimeout {
            stage: "username field",
        })?;
    username_field
        .click()
        .map_err(browser_err("failed to focus username field"))?;
    username_field
        .type_into(username)
        .map_err(browser_err("failed to type username"))?;

    let password_field = tab
        .wait_for_element_with_custom_timeout(&selectors.password, settings.timeout)
        .map_err(|_| BotError::AuthTimeout {
            stage: "password field",
        })?;
    password_field
        .click()
        .map_err(browser_err("failed to focus password field"))?;
    password_field
        .type_into(password)
        .map_err(browser_err("failed to type password"))?;

    tab.wait_for_xpath_with_custom_timeout(&selectors.submit_xpath, settings.timeout)
        .map_err(|_| BotError::AuthTimeout {
            stage: "login button",
        })?
        .click()
        .map_err(browser_err("failed to click login button"))?;

    // Bad credentials and a slow portal look the same from here.
    tab.wait_for_xpath_with_custom_timeout(&selectors.logged_in_xpath, settings.timeout)
        .map_err(|_| BotError::AuthTimeout {
            stage: "logged-in marker",
        })?;

    let cookies: Vec<BrowserCookie> = tab
        .get_cookies()
        .map_err(browser_err("failed to read cookies"))?
        .into_iter()
        .map(|cookie| BrowserCookie {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
        })
        .collect();
    debug!("Copied {} cookies from browser", cookies.len());

    let user_agent = browser.get_version().ok().map(|version| version.user_agent);

    Ok(LoginArtifacts {
        user_agent,
        cookies,
    })
}

/// Runs `work` on `resource`, then `release`s it whether `work` failed or not.
fn release_after<R: ?Sized, T>(
    resource: &R,
    work: impl FnOnce(&R) -> Result<T>,
    release: impl FnOnce(&R),
) -> Result<T> {
    let result = work(resource);
    release(resource);
    result
}
