//! Browser automation over W3C WebDriver

use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator as WdLocator};
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// How to find an element on the current page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    Id(String),
    /// Form control by its `name` attribute
    Name(String),
    LinkText(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Locator::Name(name.into())
    }

    pub fn link_text(text: impl Into<String>) -> Self {
        Locator::LinkText(text.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::Id(s) => write!(f, "id:{}", s),
            Locator::Name(s) => write!(f, "name:{}", s),
            Locator::LinkText(s) => write!(f, "link:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
        }
    }
}

/// The browser primitives a scenario needs.
///
/// Lookups are single attempts; waiting is the caller's job (see
/// [`crate::wait`]). Element-level calls fail with
/// [`E2eError::ElementNotFound`] when the locator matches nothing.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn goto(&self, url: &str) -> E2eResult<()>;

    async fn is_present(&self, locator: &Locator) -> E2eResult<bool>;

    /// Present, displayed and enabled
    async fn is_clickable(&self, locator: &Locator) -> E2eResult<bool>;

    async fn count(&self, locator: &Locator) -> E2eResult<usize>;

    async fn click(&self, locator: &Locator) -> E2eResult<()>;

    async fn send_keys(&self, locator: &Locator, text: &str) -> E2eResult<()>;

    async fn clear(&self, locator: &Locator) -> E2eResult<()>;

    async fn is_selected(&self, locator: &Locator) -> E2eResult<bool>;

    /// Rendered text of the page body
    async fn page_text(&self) -> E2eResult<String>;

    /// Contents of the document's `<title>`
    async fn title(&self) -> E2eResult<String>;

    async fn current_url(&self) -> E2eResult<String>;

    /// PNG bytes of the viewport
    async fn screenshot(&self) -> E2eResult<Vec<u8>>;

    async fn quit(&self) -> E2eResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrowserKind {
    #[default]
    Firefox,
    Chrome,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Firefox => "firefox",
            BrowserKind::Chrome => "chrome",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "firefox" | "gecko" => Ok(BrowserKind::Firefox),
            "chrome" | "chromium" => Ok(BrowserKind::Chrome),
            other => Err(E2eError::Session(format!("unsupported browser '{}'", other))),
        }
    }
}

/// Configuration for the WebDriver session
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// geckodriver / chromedriver endpoint
    pub url: String,
    pub browser: BrowserKind,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:4444".to_string(),
            browser: BrowserKind::Firefox,
            headless: true,
            window_width: 1280,
            window_height: 720,
        }
    }
}

impl WebDriverConfig {
    /// W3C capabilities for the new session
    pub fn capabilities(&self) -> Map<String, Value> {
        let size = format!("--window-size={},{}", self.window_width, self.window_height);
        let mut caps = Map::new();
        caps.insert("browserName".into(), json!(self.browser.as_str()));

        match self.browser {
            BrowserKind::Firefox => {
                let mut args = vec![
                    format!("--width={}", self.window_width),
                    format!("--height={}", self.window_height),
                ];
                if self.headless {
                    args.push("-headless".into());
                }
                caps.insert("moz:firefoxOptions".into(), json!({ "args": args }));
            }
            BrowserKind::Chrome => {
                let mut args = vec![size];
                if self.headless {
                    args.push("--headless=new".into());
                }
                caps.insert("goog:chromeOptions".into(), json!({ "args": args }));
            }
        }
        caps
    }
}

/// WebDriver has no by-name strategy; name lookups become attribute selectors
fn by_name_as_css(locator: &Locator) -> Cow<'_, Locator> {
    match locator {
        Locator::Name(name) => Cow::Owned(Locator::Css(format!("[name='{}']", name))),
        other => Cow::Borrowed(other),
    }
}

/// Expects a locator already passed through [`by_name_as_css`]
fn to_webdriver(locator: &Locator) -> WdLocator<'_> {
    match locator {
        Locator::Css(s) | Locator::Name(s) => WdLocator::Css(s),
        Locator::Id(s) => WdLocator::Id(s),
        Locator::LinkText(s) => WdLocator::LinkText(s),
        Locator::XPath(s) => WdLocator::XPath(s),
    }
}

/// [`Browser`] backed by a fantoccini WebDriver client
#[derive(Clone)]
pub struct WebDriverBrowser {
    client: Client,
}

impl WebDriverBrowser {
    /// Open a new WebDriver session
    pub async fn connect(config: &WebDriverConfig) -> E2eResult<Self> {
        info!(
            "Connecting to WebDriver at {} ({}, headless: {})",
            config.url,
            config.browser.as_str(),
            config.headless
        );

        let mut builder = ClientBuilder::rustls()
            .map_err(|e| E2eError::Session(format!("failed to build TLS connector: {}", e)))?;
        let client = builder
            .capabilities(config.capabilities())
            .connect(&config.url)
            .await
            .map_err(|e| E2eError::Session(format!("failed to connect to {}: {}", config.url, e)))?;

        Ok(Self { client })
    }

    async fn find(&self, locator: &Locator) -> E2eResult<Option<fantoccini::elements::Element>> {
        let resolved = by_name_as_css(locator);
        match self.client.find(to_webdriver(&resolved)).await {
            Ok(element) => Ok(Some(element)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn require(&self, locator: &Locator) -> E2eResult<fantoccini::elements::Element> {
        self.find(locator)
            .await?
            .ok_or_else(|| E2eError::ElementNotFound(locator.to_string()))
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        debug!("goto {}", url);
        self.client.goto(url).await?;
        Ok(())
    }

    async fn is_present(&self, locator: &Locator) -> E2eResult<bool> {
        Ok(self.find(locator).await?.is_some())
    }

    async fn is_clickable(&self, locator: &Locator) -> E2eResult<bool> {
        match self.find(locator).await? {
            Some(element) => Ok(element.is_displayed().await? && element.is_enabled().await?),
            None => Ok(false),
        }
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        let resolved = by_name_as_css(locator);
        Ok(self.client.find_all(to_webdriver(&resolved)).await?.len())
    }

    async fn click(&self, locator: &Locator) -> E2eResult<()> {
        debug!("click {}", locator);
        self.require(locator).await?.click().await?;
        Ok(())
    }

    async fn send_keys(&self, locator: &Locator, text: &str) -> E2eResult<()> {
        self.require(locator).await?.send_keys(text).await?;
        Ok(())
    }

    async fn clear(&self, locator: &Locator) -> E2eResult<()> {
        self.require(locator).await?.clear().await?;
        Ok(())
    }

    async fn is_selected(&self, locator: &Locator) -> E2eResult<bool> {
        Ok(self.require(locator).await?.is_selected().await?)
    }

    async fn page_text(&self) -> E2eResult<String> {
        let body = self.require(&Locator::css("body")).await?;
        Ok(body.text().await?)
    }

    async fn title(&self) -> E2eResult<String> {
        Ok(self.client.title().await?)
    }

    async fn current_url(&self) -> E2eResult<String> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        Ok(self.client.screenshot().await?)
    }

    async fn quit(&self) -> E2eResult<()> {
        info!("Closing WebDriver session");
        self.client.clone().close().await?;
        Ok(())
    }
}
