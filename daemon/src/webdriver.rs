use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;

use crate::driver::{AutomationDriver, AutomationSession, DriverError, SessionOptions};

/// W3C element identifier key in WebDriver responses.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Poll quantum for wait_for and click navigation detection.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded wait after a click for an optional navigation.
const CLICK_NAV_WAIT: Duration = Duration::from_secs(2);

/// Automation driver speaking the W3C WebDriver wire protocol over HTTP,
/// against chromedriver or a Selenium-compatible hub.
pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn capabilities(options: &SessionOptions) -> Value {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
        ];
        if options.headless {
            args.push("--headless=new".to_string());
            args.push("--disable-gpu".to_string());
        }
        if let Some(ua) = &options.device.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        if let Some(viewport) = &options.device.viewport {
            args.push(format!("--window-size={},{}", viewport.width, viewport.height));
        }
        if let Some(locale) = &options.device.locale {
            args.push(format!("--lang={locale}"));
        }

        let mut caps = json!({
            "browserName": "chrome",
            "goog:chromeOptions": { "args": args },
        });

        if let Some(server) = options.proxy.as_ref().and_then(|p| p.server.as_deref()) {
            caps["proxy"] = json!({
                "proxyType": "manual",
                "httpProxy": server,
                "sslProxy": server,
            });
        }

        caps
    }
}

#[async_trait]
impl AutomationDriver for WebDriverClient {
    async fn open_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn AutomationSession>, DriverError> {
        let body = json!({ "capabilities": { "alwaysMatch": Self::capabilities(options) } });
        let resp: Value = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let value = checked_value(&resp)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Session("response carried no sessionId".to_string()))?;

        Ok(Box::new(WebDriverSession {
            http: self.http.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
        }))
    }
}

struct WebDriverSession {
    http: reqwest::Client,
    session_url: String,
}

impl WebDriverSession {
    async fn post(&self, path: &str, body: Value) -> Result<Value, DriverError> {
        let resp: Value = self
            .http
            .post(format!("{}{}", self.session_url, path))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        checked_value(&resp).cloned()
    }

    async fn get(&self, path: &str) -> Result<Value, DriverError> {
        let resp: Value = self
            .http
            .get(format!("{}{}", self.session_url, path))
            .send()
            .await?
            .json()
            .await?;
        checked_value(&resp).cloned()
    }

    async fn find_element(&self, selector: &str) -> Result<Option<String>, DriverError> {
        let resp: Value = self
            .http
            .post(format!("{}/element", self.session_url))
            .json(&json!({ "using": "css selector", "value": selector }))
            .send()
            .await?
            .json()
            .await?;

        match checked_value(&resp) {
            Ok(value) => Ok(value.get(ELEMENT_KEY).and_then(Value::as_str).map(String::from)),
            Err(DriverError::Protocol(msg)) if msg.starts_with("no such element") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn require_element(&self, selector: &str) -> Result<String, DriverError> {
        self.find_element(selector)
            .await?
            .ok_or_else(|| DriverError::Action {
                selector: selector.to_string(),
                message: "no such element".to_string(),
            })
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let value = self.get("/url").await?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| DriverError::Protocol("current url was not a string".to_string()))
    }
}

#[async_trait]
impl AutomationSession for WebDriverSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        let nav = self.post("/url", json!({ "url": url }));
        match tokio::time::timeout(timeout, nav).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(DriverError::Navigation(format!(
                "timed out after {} ms loading {url}",
                timeout.as_millis()
            ))),
        }
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self.require_element(selector).await?;
        self.post(&format!("/element/{element}/clear"), json!({})).await?;
        self.post(&format!("/element/{element}/value"), json!({ "text": value }))
            .await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<bool, DriverError> {
        let before = self.current_url().await?;
        let element = self.require_element(selector).await?;
        self.post(&format!("/element/{element}/click"), json!({})).await?;

        // Bounded poll for an optional navigation; clicks that stay on the
        // page simply run out the window.
        let deadline = tokio::time::Instant::now() + CLICK_NAV_WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.current_url().await? != before {
                return Ok(true);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(false)
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.find_element(selector).await?.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        let value = self.get("/screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| DriverError::Screenshot("payload was not a string".to_string()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| DriverError::Screenshot(format!("invalid base64: {e}")))
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .http
            .delete(self.session_url.clone())
            .send()
            .await
        {
            log::warn!("Failed to close WebDriver session: {}", e);
        }
    }
}

/// Unwraps the `value` envelope, mapping WebDriver error payloads
/// (`{"value": {"error": ..., "message": ...}}`) to `DriverError`.
fn checked_value(resp: &Value) -> Result<&Value, DriverError> {
    let value = resp
        .get("value")
        .ok_or_else(|| DriverError::Protocol("response missing value envelope".to_string()))?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value.get("message").and_then(Value::as_str).unwrap_or("");
        return Err(DriverError::Protocol(format!("{error}: {message}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DeviceConfig, ProxyConfig, Viewport};

    #[test]
    fn capabilities_carry_device_identity() {
        let options = SessionOptions {
            proxy: Some(ProxyConfig {
                server: Some("http://p1:8080".to_string()),
                ..Default::default()
            }),
            device: DeviceConfig {
                user_agent: Some("TestAgent/1.0".to_string()),
                viewport: Some(Viewport { width: 1280, height: 720 }),
                locale: Some("de-DE".to_string()),
                ..Default::default()
            },
            headless: true,
        };

        let caps = WebDriverClient::capabilities(&options);
        let args: Vec<&str> = caps["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a.as_str().unwrap())
            .collect();

        assert!(args.contains(&"--headless=new"));
        assert!(args.contains(&"--user-agent=TestAgent/1.0"));
        assert!(args.contains(&"--window-size=1280,720"));
        assert!(args.contains(&"--lang=de-DE"));
        assert_eq!(caps["proxy"]["httpProxy"], "http://p1:8080");
    }

    #[test]
    fn headful_session_omits_headless_flag() {
        let options = SessionOptions {
            headless: false,
            ..Default::default()
        };
        let caps = WebDriverClient::capabilities(&options);
        let args = caps["goog:chromeOptions"]["args"].to_string();
        assert!(!args.contains("--headless"));
        assert!(caps.get("proxy").is_none());
    }

    #[test]
    fn error_envelope_maps_to_protocol_error() {
        let resp = serde_json::json!({
            "value": { "error": "no such element", "message": "not found" }
        });
        match checked_value(&resp) {
            Err(DriverError::Protocol(msg)) => assert!(msg.starts_with("no such element")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }
}
