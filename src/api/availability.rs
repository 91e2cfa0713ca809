//! # API de disponibilidad
//!
//! Consulta pública (sin token): se puede repetir las veces que haga falta y
//! no bloquea ni reserva nada.

use actix_web::{get, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use super::{format_time, parse_id, validate_date, AppError, AppResult};
use crate::engine::slots::Slot;
use crate::engine::Engine;

#[derive(Deserialize)]
struct AvailabilityQuery {
    /// YYYY-MM-DD
    date: Option<String>,
    service_id: Option<String>,
}

#[derive(Serialize)]
struct SlotResponse {
    start: String,
    end: String,
}

impl From<Slot> for SlotResponse {
    fn from(slot: Slot) -> Self {
        SlotResponse {
            start: format_time(slot.start),
            end: format_time(slot.end),
        }
    }
}

/// Huecos libres de un profesional para un servicio
///
/// # Respuesta
/// ```json
/// [{ "start": "10:00", "end": "11:00" }, { "start": "10:30", "end": "11:30" }]
/// ```
///
/// # Errores
/// - `400 Bad Request`: fecha pasada o parámetros con formato incorrecto
/// - `404 Not Found`: servicio inexistente
/// - `422 Unprocessable Entity`: el profesional no ofrece el servicio
#[get("/staff/{staff_id}/availability")]
async fn availability(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    query: web::Query<AvailabilityQuery>,
) -> AppResult<impl Responder> {
    let staff_id = parse_id("staff_id", &path)?;
    let date = query
        .date
        .as_deref()
        .ok_or_else(|| AppError::validation_field("date", "Parámetro requerido"))
        .and_then(validate_date)?;
    let service_id = query
        .service_id
        .as_deref()
        .ok_or_else(|| AppError::validation_field("service_id", "Parámetro requerido"))
        .and_then(|id| parse_id("service_id", id))?;

    let slots = engine.available_slots(staff_id, date, service_id).await?;
    let body: Vec<SlotResponse> = slots.into_iter().map(SlotResponse::from).collect();

    Ok(HttpResponse::Ok().json(body))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(availability);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::data;
    use crate::api::ErrorResponse;
    use crate::engine::testing::{harness, salon};
    use actix_web::{test, App};

    #[actix_web::test]
    async fn lists_slots_for_a_working_day() {
        let h = harness();
        let s = salon(&h);
        let app = test::init_service(App::new().app_data(data(&h)).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri(&format!(
                "/staff/{}/availability?date=2026-10-19&service_id={}",
                s.staff_id.to_hex(),
                s.service.id.to_hex()
            ))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let slots = body.as_array().unwrap();
        assert_eq!(slots.len(), 15);
        assert_eq!(slots[0], serde_json::json!({ "start": "10:00", "end": "11:00" }));
        assert_eq!(slots[14], serde_json::json!({ "start": "17:00", "end": "18:00" }));
    }

    #[actix_web::test]
    async fn missing_or_past_date_is_rejected() {
        let h = harness();
        let s = salon(&h);
        let app = test::init_service(App::new().app_data(data(&h)).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri(&format!("/staff/{}/availability?service_id={}", s.staff_id, s.service.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);

        let req = test::TestRequest::get()
            .uri(&format!(
                "/staff/{}/availability?date=2026-10-01&service_id={}",
                s.staff_id, s.service.id
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);
        let err: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(err.code, "invalid_date");
    }
}
