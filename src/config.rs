//! Configuración desde variables de entorno (y `.env` vía dotenvy).
//!
//! Todas las claves tienen valor por defecto; un valor que no se puede
//! interpretar se ignora con un aviso y se usa el de por defecto.

use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::slots::{SlotPolicy, DEFAULT_STEP_MINUTES, MINUTES_PER_DAY};
use crate::engine::EngineSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo: MongoConfig,
    pub server: ServerConfig,
    pub line: LineConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Sin token solo se registran las notificaciones
    pub channel_access_token: Option<String>,
    pub push_endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `fixed` o `duration`
    pub slot_policy: String,
    pub slot_step_minutes: u32,
    pub token_ttl_minutes: i64,
    pub lock_timeout_ms: u64,
    /// Desfase de la tienda respecto a UTC (540 = JST)
    pub business_utc_offset_minutes: i32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            mongo: MongoConfig {
                uri: var("MONGODB_URI").unwrap_or_else(|| "mongodb://localhost:27017".to_string()),
                database: var("MONGODB_DATABASE")
                    .unwrap_or_else(|| "miniapp_reservation".to_string()),
            },
            server: ServerConfig {
                bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            },
            line: LineConfig {
                channel_access_token: var("LINE_CHANNEL_ACCESS_TOKEN").filter(|t| !t.trim().is_empty()),
                push_endpoint: var("LINE_PUSH_ENDPOINT")
                    .unwrap_or_else(|| "https://api.line.me/v2/bot/message/push".to_string()),
                timeout_secs: parse_or(&var, "NOTIFY_TIMEOUT_SECS", 5),
            },
            engine: EngineConfig {
                slot_policy: var("SLOT_POLICY").unwrap_or_else(|| "fixed".to_string()),
                slot_step_minutes: parse_or(&var, "SLOT_STEP_MINUTES", DEFAULT_STEP_MINUTES),
                token_ttl_minutes: parse_or(&var, "TOKEN_TTL_MINUTES", 5),
                lock_timeout_ms: parse_or(&var, "LOCK_TIMEOUT_MS", 2000),
                business_utc_offset_minutes: parse_or(&var, "BUSINESS_UTC_OFFSET_MINUTES", 540),
            },
        }
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Valor de configuración no válido; se usa el de por defecto");
            default
        }),
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();

        let slot_policy = match self.slot_policy.trim().to_ascii_lowercase().as_str() {
            "duration" => SlotPolicy::ServiceDuration,
            "fixed" if (1..=MINUTES_PER_DAY).contains(&self.slot_step_minutes) => {
                SlotPolicy::FixedStep(self.slot_step_minutes)
            }
            "fixed" => {
                tracing::warn!(
                    step = self.slot_step_minutes,
                    "SLOT_STEP_MINUTES fuera de rango (1..=1440); se usa el paso por defecto"
                );
                SlotPolicy::default()
            }
            other => {
                tracing::warn!(policy = %other, "SLOT_POLICY desconocida; se usa paso fijo");
                SlotPolicy::default()
            }
        };

        let token_ttl = if self.token_ttl_minutes > 0 {
            chrono::Duration::minutes(self.token_ttl_minutes)
        } else {
            defaults.token_ttl
        };

        let lock_timeout = if self.lock_timeout_ms > 0 {
            Duration::from_millis(self.lock_timeout_ms)
        } else {
            defaults.lock_timeout
        };

        let business_offset = FixedOffset::east_opt(self.business_utc_offset_minutes * 60)
            .unwrap_or_else(|| {
                tracing::warn!(
                    minutes = self.business_utc_offset_minutes,
                    "Desfase horario fuera de rango; se usa UTC"
                );
                Utc.fix()
            });

        EngineSettings {
            slot_policy,
            token_ttl,
            lock_timeout,
            business_offset,
        }
    }
}
