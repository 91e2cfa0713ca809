//! Reserva atómica de un hueco.
//!
//! La lista de huecos que vio el cliente puede estar obsoleta, así que dentro
//! de la transacción se bloquea (profesional, fecha), se vuelve a comprobar el
//! solape con las reservas vigentes y solo entonces se inserta en `pending`.

use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;

use super::schedule::WorkingWindow;
use super::slots::{minute_of_day, time_at, Interval};
use super::Engine;
use crate::api::{AppError, AppResult};
use crate::db::models::{Member, Reservation, ReservationStatus, Service};

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub staff_id: ObjectId,
    pub service_id: ObjectId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub notes: Option<String>,
}

impl Engine {
    /// Servicio activo que el profesional tiene vinculado
    pub(crate) async fn bookable_service(
        &self,
        staff_id: ObjectId,
        service_id: ObjectId,
    ) -> AppResult<Service> {
        let service = self
            .store
            .service(service_id)
            .await?
            .ok_or_else(|| AppError::not_found_id("Servicio", &service_id.to_hex()))?;

        if !service.is_active {
            return Err(AppError::validation_field("service_id", "El servicio no está activo"));
        }
        if service.duration_minutes <= 0 {
            return Err(AppError::validation_field("service_id", "El servicio no tiene duración"));
        }
        if !self.store.staff_offers_service(staff_id, service_id).await? {
            return Err(AppError::CapabilityMismatch);
        }
        Ok(service)
    }

    pub async fn book(&self, member: &Member, request: BookingRequest) -> AppResult<Reservation> {
        let service = self
            .bookable_service(request.staff_id, request.service_id)
            .await?;

        let now = self.local_now();
        if request.date < now.date() {
            return Err(AppError::InvalidDate(format!("{} ya ha pasado", request.date)));
        }
        if request.date == now.date() && request.start_time <= now.time() {
            return Err(AppError::InvalidDate(format!(
                "las {} de hoy ya han pasado",
                request.start_time.format("%H:%M")
            )));
        }

        let start = minute_of_day(request.start_time);
        let candidate = Interval {
            start,
            end: start + service.duration_minutes as u32,
        };
        let end_time = time_at(candidate.end).ok_or(AppError::SlotUnavailable)?;

        match self.working_window(request.staff_id, request.date).await? {
            WorkingWindow::Open { start, end }
                if minute_of_day(start) <= candidate.start && candidate.end <= minute_of_day(end) => {}
            _ => return Err(AppError::SlotUnavailable),
        }

        let created_at = self.now().timestamp();
        let reservation = Reservation {
            id: ObjectId::new(),
            staff_id: request.staff_id,
            service_id: service.id,
            member_id: member.id,
            date: request.date,
            start_time: request.start_time,
            end_time,
            status: ReservationStatus::Pending,
            notes: request.notes,
            cancel_reason: None,
            cancelled_at: None,
            created_at,
            updated_at: created_at,
        };

        let scope = format!("staff {} / {}", reservation.staff_id, reservation.date);
        let pending = &reservation;
        self.with_lock_retry(&scope, move || self.insert_if_free(pending, candidate))
            .await
            .map_err(|e| {
                if e.is_lock_contention() {
                    AppError::SlotUnavailable
                } else {
                    e
                }
            })?;

        tracing::info!(
            reservation_id = %reservation.id,
            staff_id = %reservation.staff_id,
            member_id = %member.id,
            date = %reservation.date,
            start = %reservation.start_time,
            end = %reservation.end_time,
            status = %reservation.status,
            "Reservation created"
        );

        self.notify_member(
            member.id,
            format!(
                "Hemos recibido tu reserva de {} para el {} de {} a {}. Te avisaremos cuando se confirme.",
                service.name,
                reservation.date.format("%d/%m/%Y"),
                reservation.start_time.format("%H:%M"),
                reservation.end_time.format("%H:%M"),
            ),
        );

        Ok(reservation)
    }

    async fn insert_if_free(&self, reservation: &Reservation, candidate: Interval) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        tx.lock_staff_day(reservation.staff_id, reservation.date)
            .await?;

        let existing = tx
            .active_reservations(reservation.staff_id, reservation.date)
            .await?;
        if let Some(clash) = existing
            .iter()
            .find(|r| Interval::from(*r).overlaps(&candidate))
        {
            tracing::info!(
                staff_id = %reservation.staff_id,
                date = %reservation.date,
                clashes_with = %clash.id,
                "Slot taken while booking"
            );
            let _ = tx.abort().await; // el conflicto importa más que el abort
            return Err(AppError::SlotUnavailable);
        }

        tx.insert_reservation(reservation).await?;
        tx.commit().await
    }
}
