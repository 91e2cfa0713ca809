//! # Notificaciones salientes
//!
//! Mensajes push de LINE a los socios. Son "dispara y olvida": el motor los
//! envía después del commit y un fallo solo se registra en el log.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::LineConfig;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// `true` si el mensaje fue aceptado
    async fn notify(&self, recipient: &str, text: &str) -> bool;
}

#[derive(Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    messages: [TextMessage<'a>; 1],
}

#[derive(Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

/// Envía mensajes de texto con la API push de LINE Messaging
pub struct LinePushNotifier {
    client: reqwest::Client,
    endpoint: String,
    channel_access_token: String,
}

impl LinePushNotifier {
    pub fn new(
        endpoint: String,
        channel_access_token: String,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            channel_access_token,
        })
    }
}

#[async_trait]
impl Notifier for LinePushNotifier {
    async fn notify(&self, recipient: &str, text: &str) -> bool {
        let body = PushMessage {
            to: recipient,
            messages: [TextMessage { kind: "text", text }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.channel_access_token)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(recipient = %recipient, "LINE push delivered");
                true
            }
            Ok(resp) => {
                tracing::warn!(recipient = %recipient, status = %resp.status(), "LINE push rejected");
                false
            }
            Err(e) => {
                tracing::warn!(recipient = %recipient, error = %e, "LINE push failed");
                false
            }
        }
    }
}

/// Sin canal configurado: solo deja constancia en el log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, text: &str) -> bool {
        tracing::info!(recipient = %recipient, text = %text, "Notification (LINE channel not configured)");
        true
    }
}

/// Elige el notificador según haya o no token de canal
pub fn from_config(config: &LineConfig) -> Box<dyn Notifier> {
    let Some(token) = &config.channel_access_token else {
        tracing::warn!("LINE_CHANNEL_ACCESS_TOKEN no configurado; las notificaciones solo se registran");
        return Box::new(LogNotifier);
    };

    match LinePushNotifier::new(
        config.push_endpoint.clone(),
        token.clone(),
        Duration::from_secs(config.timeout_secs),
    ) {
        Ok(notifier) => Box::new(notifier),
        Err(e) => {
            tracing::error!(error = %e, "No se pudo crear el cliente HTTP de LINE; se usará el log");
            Box::new(LogNotifier)
        }
    }
}
