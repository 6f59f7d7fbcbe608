use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use questline_common::{AccountRecord, Outcome};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::retry::{RequestExecutor, RetryPolicy};
use super::{SessionFactory, StepApi};
use crate::errors::StepError;
use crate::quest_config::EndpointsConfig;

/// Everything an HTTP session needs besides the account itself.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Base URL without a trailing slash
    pub base_url: String,
    pub endpoints: EndpointsConfig,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ApiSettings {
    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

/// Opaque account identifier sent to the service.
///
/// Hex SHA-256 of the private key; the key itself never leaves the process.
pub fn account_fingerprint(private_key: &str) -> String {
    hex::encode(Sha256::digest(private_key.as_bytes()))
}

/// One account's HTTP session: its own client, cookie jar and proxy.
pub struct HttpStepApi {
    executor: RequestExecutor,
    settings: Arc<ApiSettings>,
    fingerprint: String,
}

impl HttpStepApi {
    pub fn new(executor: RequestExecutor, settings: Arc<ApiSettings>, fingerprint: String) -> Self {
        Self {
            executor,
            settings,
            fingerprint,
        }
    }

    async fn call(&self, endpoint: &str, args: Value) -> Result<Outcome, StepError> {
        let mut body = json!({ "account": self.fingerprint });
        if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), args) {
            target.extend(extra);
        }
        self.executor
            .post_json(&self.settings.url(endpoint), &body)
            .await
    }
}

#[async_trait]
impl StepApi for HttpStepApi {
    async fn sign_in(&self) -> Result<Outcome, StepError> {
        self.call(&self.settings.endpoints.sign_in, Value::Null).await
    }

    async fn register(&self, email: &str) -> Result<Outcome, StepError> {
        self.call(&self.settings.endpoints.register, json!({ "email": email }))
            .await
    }

    async fn follow(&self) -> Result<Outcome, StepError> {
        self.call(&self.settings.endpoints.follow, Value::Null).await
    }

    async fn link_handle(&self, handle: &str) -> Result<Outcome, StepError> {
        self.call(&self.settings.endpoints.link_handle, json!({ "handle": handle }))
            .await
    }

    async fn link_oauth(&self, token: &str) -> Result<Outcome, StepError> {
        self.call(&self.settings.endpoints.link_oauth, json!({ "token": token }))
            .await
    }

    async fn generate_code(&self) -> Result<Outcome, StepError> {
        let mut outcome = self
            .call(&self.settings.endpoints.generate_code, Value::Null)
            .await?;
        // Some deployments wrap the code as {"data": {"code": "..."}}
        if let Some(code) = outcome.payload.get("code").and_then(Value::as_str) {
            outcome.payload = Value::String(code.to_string());
        }
        Ok(outcome)
    }

    async fn consume_code(&self, code: &str) -> Result<Outcome, StepError> {
        self.call(&self.settings.endpoints.consume_code, json!({ "code": code }))
            .await
    }
}

/// Builds a fresh `HttpStepApi` per account.
#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    settings: Arc<ApiSettings>,
    use_proxy: bool,
}

impl HttpSessionFactory {
    pub fn new(settings: ApiSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            use_proxy: true,
        }
    }

    /// Connect directly instead of through each account's proxy.
    pub fn direct(mut self) -> Self {
        self.use_proxy = false;
        self
    }

    fn build_client(&self, account: &AccountRecord) -> Result<reqwest::Client, StepError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.settings.timeout)
            .cookie_store(true);
        if self.use_proxy {
            let proxy = reqwest::Proxy::all(&account.proxy_url)
                .map_err(|e| StepError::Session(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| StepError::Session(e.to_string()))
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self, account: &AccountRecord) -> Result<Box<dyn StepApi>, StepError> {
        let client = self.build_client(account)?;
        let executor = RequestExecutor::new(client, self.settings.retry.clone());
        Ok(Box::new(HttpStepApi::new(
            executor,
            self.settings.clone(),
            account_fingerprint(&account.private_key),
        )))
    }
}
