//! # Mini-app Reservation Server
//!
//! Servidor de reservas y canje de QR para mini-apps de LINE construido con
//! Rust, Actix Web y MongoDB.
//!
//! ## Características principales
//!
//! - **Disponibilidad**: huecos libres según el horario semanal y las excepciones
//! - **Reservas**: reserva atómica sin solapes y ciclo de vida completo
//! - **QR de un solo uso**: sumar puntos, gastar puntos y tickets de reseña
//! - **Notificaciones**: avisos push por LINE tras cada cambio relevante
//!
//! ## Configuración
//!
//! El servidor se configura mediante variables de entorno (archivo `.env`):
//!
//! ```env
//! # Base de datos MongoDB (replica set: las transacciones lo necesitan)
//! MONGODB_URI=mongodb://localhost:27017/?replicaSet=rs0
//! MONGODB_DATABASE=miniapp_reservation
//!
//! # Servidor
//! BIND_ADDRESS=0.0.0.0:8080
//!
//! # Motor
//! SLOT_POLICY=fixed
//! SLOT_STEP_MINUTES=30
//! TOKEN_TTL_MINUTES=5
//! LOCK_TIMEOUT_MS=2000
//! BUSINESS_UTC_OFFSET_MINUTES=540
//!
//! # LINE Messaging API (opcional)
//! LINE_CHANNEL_ACCESS_TOKEN=
//! NOTIFY_TIMEOUT_SECS=5
//!
//! # Logging
//! RUST_LOG=debug,mongodb=info
//! ```
//!
//! ## Arquitectura
//!
//! ```text
//! Mini-app LINE (LIFF)
//!     ↓ HTTP/JSON
//! API REST (Actix Web)
//!     ↓
//! Engine (reservas, QR)  →  LINE push
//!     ↓ transacciones
//! MongoDB
//! ```

use actix_web::{middleware::Logger, web, App, HttpServer};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod engine;
mod notify;

use engine::clock::SystemClock;
use engine::Engine;

/// Filtro de logs: `RUST_LOG` más el nivel por defecto de la app y del driver
fn log_filter() -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["miniapp_reservation=debug", "mongodb=info"] {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("Directiva de log inválida {}: {}", directive, e),
        }
    }
    filter
}

/// Función principal que inicia el servidor web
///
/// 1. Carga variables de entorno desde `.env`
/// 2. Configura el sistema de logging con tracing
/// 3. Establece conexión con MongoDB y crea índices
/// 4. Monta el motor con el notificador de LINE
/// 5. Inicia el servidor HTTP en `BIND_ADDRESS`
///
/// # Errores
///
/// Retorna `std::io::Error` si no se puede conectar a MongoDB o no se puede
/// abrir el puerto.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    tracing::info!("Iniciando Mini-app Reservation Server con MongoDB...");

    let config = config::Config::from_env();

    let mongo_repo = match db::MongoRepo::init(&config.mongo).await {
        Ok(repo) => {
            if let Err(e) = repo.create_indexes().await {
                tracing::warn!("Advertencia creando índices: {}", e);
                // No es un error fatal, continuamos sin índices
            }
            repo
        }
        Err(e) => {
            tracing::error!("Error conectando a MongoDB: {}", e);
            return Err(std::io::Error::other(format!("Error de MongoDB: {}", e)));
        }
    };

    let settings = config.engine.settings();
    tracing::info!(
        slot_policy = ?settings.slot_policy,
        token_ttl_secs = settings.token_ttl.num_seconds(),
        lock_timeout_ms = settings.lock_timeout.as_millis() as u64,
        business_offset = %settings.business_offset,
        "Motor configurado"
    );

    let engine = web::Data::new(Engine::new(
        Arc::new(mongo_repo),
        Arc::from(notify::from_config(&config.line)),
        Arc::new(SystemClock),
        settings,
    ));

    let bind_address = config.server.bind_address.clone();
    tracing::info!("Servidor iniciando en {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .wrap(Logger::default())
            .configure(api::init_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
