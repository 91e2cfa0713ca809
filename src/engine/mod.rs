//! # Motor de reservas y canjes
//!
//! Núcleo independiente del almacenamiento:
//!
//! - [`schedule`] - horario efectivo de un profesional para una fecha
//! - [`slots`] - huecos orientativos para un servicio
//! - [`booking`] - reserva atómica sin solapes
//! - [`lifecycle`] - máquina de estados de la reserva
//! - [`tokens`] - emisión de QR de un solo uso
//! - [`redemption`] - canje atómico de QR (sumar, gastar, ticket de reseña)
//!
//! Las operaciones críticas bloquean un ámbito estrecho (profesional+día o el
//! propio QR) y si encuentran el bloqueo ocupado reintentan con espera
//! creciente hasta `lock_timeout`.

pub mod booking;
pub mod clock;
pub mod lifecycle;
pub mod redemption;
pub mod schedule;
pub mod slots;
pub mod tokens;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use mongodb::bson::oid::ObjectId;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::AppResult;
use crate::db::store::Store;
use crate::notify::Notifier;
use clock::Clock;
use slots::SlotPolicy;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub slot_policy: SlotPolicy,
    pub token_ttl: chrono::Duration,
    /// Tiempo máximo esperando un bloqueo antes de rendirse
    pub lock_timeout: Duration,
    /// Zona de la tienda para decidir qué es "hoy"
    pub business_offset: FixedOffset,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            slot_policy: SlotPolicy::default(),
            token_ttl: chrono::Duration::minutes(5),
            lock_timeout: Duration::from_millis(2000),
            business_offset: FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

pub struct Engine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now()
            .with_timezone(&self.settings.business_offset)
            .naive_local()
    }

    /// Ejecuta `attempt` (que abre su propia transacción) y lo repite mientras
    /// falle por bloqueo ocupado y no se haya agotado `lock_timeout`.
    async fn with_lock_retry<T, F, Fut>(&self, scope: &str, mut attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let deadline = Instant::now() + self.settings.lock_timeout;
        let mut backoff = INITIAL_BACKOFF;
        let mut retries = 0u32;

        loop {
            match attempt().await {
                Err(e) if e.is_lock_contention() && Instant::now() < deadline => {
                    retries += 1;
                    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
                    let wait = backoff.mul_f64(jitter);
                    tracing::debug!(scope = %scope, retries, wait_ms = wait.as_millis() as u64, "Lock busy, retrying");
                    tokio::time::sleep(wait).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) if e.is_lock_contention() => {
                    tracing::warn!(scope = %scope, retries, "Lock wait exhausted");
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    /// Aviso al socio por LINE tras el commit. Nunca falla hacia el llamante.
    fn notify_member(&self, member_id: ObjectId, text: String) {
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let recipient = match store.member(member_id).await {
                Ok(Some(member)) => member.line_user_id,
                Ok(None) => {
                    tracing::warn!(member_id = %member_id, "Notification skipped: member not found");
                    return;
                }
                Err(e) => {
                    tracing::warn!(member_id = %member_id, error = %e, "Notification skipped: member lookup failed");
                    return;
                }
            };
            if !notifier.notify(&recipient, &text).await {
                tracing::warn!(member_id = %member_id, "Notification could not be delivered");
            }
        });
    }
}
