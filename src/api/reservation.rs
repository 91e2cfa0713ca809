//! # API de Reservas
//!
//! - Reservar un hueco (socio)
//! - Cancelar una reserva propia (socio)
//! - Confirmar, iniciar, completar, cancelar o marcar no presentado (operador)
//!
//! Todas las operaciones requieren autenticación mediante token Bearer.

use actix_web::{post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use super::auth::{authenticate_member, authenticate_operator};
use super::{format_time, parse_id, rfc3339, validate_date, validate_time, AppError, AppResult};
use crate::db::models::Reservation;
use crate::engine::booking::BookingRequest;
use crate::engine::lifecycle::{Actor, LifecycleAction};
use crate::engine::Engine;

/// Máximo de caracteres en notas y motivos de cancelación
const MAX_TEXT_LEN: usize = 500;

#[derive(Deserialize)]
struct MakeReservation {
    staff_id: String,
    service_id: String,
    /// Fecha de la reserva (formato YYYY-MM-DD)
    date: String,
    /// Hora de inicio (formato HH:MM)
    start_time: String,
    notes: Option<String>,
}

#[derive(Deserialize, Default)]
struct CancelRequest {
    reason: Option<String>,
}

/// Reserva tal y como viaja al frontend
#[derive(Serialize)]
struct ReservationResponse {
    id: String,
    staff_id: String,
    service_id: String,
    member_id: String,
    date: String,
    start_time: String,
    end_time: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancel_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancelled_at: Option<String>,
    created_at: String,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        ReservationResponse {
            id: r.id.to_hex(),
            staff_id: r.staff_id.to_hex(),
            service_id: r.service_id.to_hex(),
            member_id: r.member_id.to_hex(),
            date: r.date.format("%Y-%m-%d").to_string(),
            start_time: format_time(r.start_time),
            end_time: format_time(r.end_time),
            status: r.status.as_str().to_string(),
            notes: r.notes,
            cancel_reason: r.cancel_reason,
            cancelled_at: r.cancelled_at.map(rfc3339),
            created_at: rfc3339(r.created_at),
        }
    }
}

fn check_text(field: &str, text: &Option<String>) -> AppResult<()> {
    match text {
        Some(t) if t.chars().count() > MAX_TEXT_LEN => Err(AppError::validation_field(
            field,
            &format!("Máximo {} caracteres", MAX_TEXT_LEN),
        )),
        _ => Ok(()),
    }
}

/// Crea una nueva reserva en estado `pending`
///
/// # Validaciones
/// - Fecha (YYYY-MM-DD) y hora (HH:MM) válidas y no pasadas
/// - El servicio existe, está activo y lo ofrece el profesional
/// - El hueco cabe en la jornada y no se solapa con otra reserva activa
///
/// # Errores
/// - `400 Bad Request`: datos incorrectos o fecha pasada
/// - `401 Unauthorized` / `403 Forbidden`: token ausente o socio no registrado
/// - `404 Not Found`: servicio inexistente
/// - `409 Conflict`: `slot_unavailable`
/// - `422 Unprocessable Entity`: el profesional no ofrece el servicio
#[post("/reservations")]
async fn make_reservation(
    engine: web::Data<Engine>,
    data: web::Json<MakeReservation>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let member = authenticate_member(&engine, &req).await?;
    let data = data.into_inner();

    check_text("notes", &data.notes)?;
    let request = BookingRequest {
        staff_id: parse_id("staff_id", &data.staff_id)?,
        service_id: parse_id("service_id", &data.service_id)?,
        date: validate_date(&data.date)?,
        start_time: validate_time(&data.start_time)?,
        notes: data.notes.filter(|n| !n.trim().is_empty()),
    };

    let reservation = engine.book(&member, request).await?;
    Ok(HttpResponse::Created().json(ReservationResponse::from(reservation)))
}

/// Cancelación por el propio socio (solo `pending` o `confirmed`)
#[post("/reservations/{id}/cancel")]
async fn cancel_reservation(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    body: Option<web::Json<CancelRequest>>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let member = authenticate_member(&engine, &req).await?;
    let reservation_id = parse_id("id", &path)?;
    let reason = body.map(|b| b.into_inner()).unwrap_or_default().reason;
    check_text("reason", &reason)?;

    let reservation = engine
        .transition_reservation(
            reservation_id,
            Actor::Member(member.id),
            LifecycleAction::Cancel,
            reason,
        )
        .await?;
    Ok(HttpResponse::Ok().json(ReservationResponse::from(reservation)))
}

/// Cambio de estado desde la tienda
///
/// `action`: `confirm`, `start`, `complete`, `cancel` o `no-show`
///
/// # Errores
/// - `409 Conflict`: `invalid_transition` si el estado actual no lo permite
#[post("/operator/reservations/{id}/{action}")]
async fn operator_transition(
    engine: web::Data<Engine>,
    path: web::Path<(String, String)>,
    body: Option<web::Json<CancelRequest>>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let operator = authenticate_operator(&engine, &req).await?;
    let (id, action) = path.into_inner();
    let reservation_id = parse_id("id", &id)?;
    let action = LifecycleAction::from_path(&action)
        .ok_or_else(|| AppError::validation_field("action", "Acción desconocida"))?;
    let reason = body.map(|b| b.into_inner()).unwrap_or_default().reason;
    check_text("reason", &reason)?;

    let reservation = engine
        .transition_reservation(reservation_id, Actor::Operator(operator.id), action, reason)
        .await?;
    Ok(HttpResponse::Ok().json(ReservationResponse::from(reservation)))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(make_reservation);
    cfg.service(cancel_reservation);
    cfg.service(operator_transition);
}
