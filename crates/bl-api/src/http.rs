use std::time::Duration;

use bl_core::{BotError, BotValue};
use bl_runtime::HostFunctionRegistry;
use reqwest::blocking::Client;
use tracing::debug;

pub const FETCH_JSON: &str = "fetch_json";
pub const FETCH_TEXT: &str = "fetch_text";

/// Blocking HTTP helpers exposed to scripts as `fetch_json(url)` and `fetch_text(url)`.
pub struct HttpHostFunctions {
    client: Client,
    names: Vec<String>,
}

impl HttpHostFunctions {
    pub fn new(timeout: Duration) -> Result<Self, BotError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("botlang/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| {
                BotError::new(
                    "API_HTTP_CLIENT",
                    format!("failed to build HTTP client: {}", error),
                )
            })?;
        Ok(Self {
            client,
            names: vec![FETCH_JSON.to_string(), FETCH_TEXT.to_string()],
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, BotError> {
        debug!(%url, "host fetch");
        self.client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(http_error)
    }
}

impl HostFunctionRegistry for HttpHostFunctions {
    fn call(&self, name: &str, args: &[BotValue]) -> Result<BotValue, BotError> {
        let url = match args {
            [BotValue::String(url)] => url.as_str(),
            _ => {
                return Err(BotError::new(
                    "API_HOST_ARGUMENT",
                    format!("{}(url) expects exactly one string argument.", name),
                ))
            }
        };
        match name {
            FETCH_JSON => self.get(url)?.json::<BotValue>().map_err(http_error),
            FETCH_TEXT => self
                .get(url)?
                .text()
                .map(BotValue::String)
                .map_err(http_error),
            _ => Err(BotError::new(
                "API_HOST_FUNCTION_MISSING",
                format!("Host function \"{}\" is not provided.", name),
            )),
        }
    }

    fn names(&self) -> &[String] {
        &self.names
    }
}

fn http_error(error: reqwest::Error) -> BotError {
    BotError::new("API_HTTP_ERROR", format!("HTTP request failed: {}", error))
}
