use async_trait::async_trait;
use reqwest::Method;
use tollgate_core::reporter::{ViolationEvent, ViolationSink};
use tollgate_core::settings::rate_limiting::WebhookSettings;
use tracing::debug;

/// Posts each violation event as JSON to a configured URL.
pub struct WebhookSink {
    client: reqwest::Client,
    settings: WebhookSettings,
}

impl WebhookSink {
    pub fn new(settings: &WebhookSettings) -> Self {
        WebhookSink {
            client: reqwest::Client::new(),
            settings: settings.to_owned(),
        }
    }

    fn get_method(&self) -> Method {
        match self.settings.method.to_lowercase().as_str() {
            "put" => Method::PUT,
            "patch" => Method::PATCH,
            _ => Method::POST,
        }
    }
}

#[async_trait]
impl ViolationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn emit(&self, event: &ViolationEvent) -> anyhow::Result<()> {
        debug!("Sending violation {} to {}", event.id, self.settings.url);
        self.client
            .request(self.get_method(), &self.settings.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
