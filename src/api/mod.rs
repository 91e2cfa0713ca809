//! # Módulo API
//!
//! Adaptadores HTTP finos sobre el [`Engine`](crate::engine::Engine).
//!
//! ## Módulos principales
//!
//! - [`auth`] - Tokens Bearer de operadores y socios
//! - [`availability`] - Huecos libres de un profesional
//! - [`reservation`] - Reservar, cancelar y gestionar el estado
//! - [`tokens`] - Emitir, consultar y canjear QR
//! - [`members`] - Saldo, movimientos y tickets de reseña del socio
//! - [`errors`] - Manejo de errores de la aplicación

pub mod auth;
pub mod availability;
pub mod errors;
pub mod members;
pub mod middleware;
pub mod reservation;
pub mod tokens;

// Re-exportar tipos comunes para facilitar su uso
pub use errors::{AppError, AppResult, ErrorResponse, ResultExt};

use actix_web::web;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat};
use mongodb::bson::oid::ObjectId;

/// Configura todas las rutas de la API
///
/// ## Rutas configuradas
///
/// - `/staff/{staff_id}/availability` - Ver [`availability::routes`]
/// - `/reservations/*`, `/operator/reservations/*` - Ver [`reservation::routes`]
/// - `/tokens/*` - Ver [`tokens::routes`]
/// - `/members/me/*` - Ver [`members::routes`]
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    availability::routes(cfg);
    reservation::routes(cfg);
    tokens::routes(cfg);
    members::routes(cfg);
}

/// Valida y parsea una fecha en formato YYYY-MM-DD
pub(crate) fn validate_date(date_str: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .map_err_validation("Formato de fecha inválido, use YYYY-MM-DD")
}

/// Valida y parsea una hora en formato HH:MM
pub(crate) fn validate_time(time_str: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(time_str.trim(), "%H:%M")
        .map_err_validation("Formato de hora inválido, use HH:MM")
}

/// Convierte un ObjectId en texto, indicando el campo si no es válido
pub(crate) fn parse_id(field: &str, value: &str) -> AppResult<ObjectId> {
    ObjectId::parse_str(value.trim())
        .map_err(|_| AppError::validation_field(field, "Identificador no válido"))
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Segundos unix a RFC 3339 en UTC
pub(crate) fn rfc3339(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
