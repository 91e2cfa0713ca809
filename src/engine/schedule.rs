//! Horario efectivo de un profesional para una fecha.
//!
//! Una excepción para la fecha manda siempre sobre el horario semanal; si
//! está marcada como no disponible, el día queda cerrado aunque traiga horas.

use chrono::{Datelike, NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;
use serde::Serialize;

use super::Engine;
use crate::api::AppResult;
use crate::db::models::{ScheduleException, StaffSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkingWindow {
    Open { start: NaiveTime, end: NaiveTime },
    Closed,
}

impl WorkingWindow {
    fn open(start: NaiveTime, end: NaiveTime) -> Self {
        if start < end {
            Self::Open { start, end }
        } else {
            Self::Closed
        }
    }
}

/// 0 = domingo ... 6 = sábado
pub fn day_of_week(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

/// Combina horario semanal y excepción. Sin efectos secundarios.
///
/// Una excepción disponible sin horas hereda las del horario semanal (si ese
/// día se trabaja); si no hay de dónde sacarlas, el día queda cerrado.
pub fn resolve(
    weekly: Option<&StaffSchedule>,
    exception: Option<&ScheduleException>,
) -> WorkingWindow {
    let weekly_window = weekly
        .filter(|w| w.is_available)
        .map(|w| WorkingWindow::open(w.start_time, w.end_time))
        .unwrap_or(WorkingWindow::Closed);

    match exception {
        None => weekly_window,
        Some(e) if !e.is_available => WorkingWindow::Closed,
        Some(e) => match (e.start_time, e.end_time) {
            (Some(start), Some(end)) => WorkingWindow::open(start, end),
            _ => weekly_window,
        },
    }
}

impl Engine {
    pub async fn working_window(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> AppResult<WorkingWindow> {
        let exception = self.store.schedule_exception(staff_id, date).await?;
        let weekly = match &exception {
            Some(e) if !e.is_available => None,
            Some(ScheduleException {
                start_time: Some(_),
                end_time: Some(_),
                ..
            }) => None,
            _ => {
                self.store
                    .weekly_schedule(staff_id, day_of_week(date))
                    .await?
            }
        };

        let window = resolve(weekly.as_ref(), exception.as_ref());
        tracing::debug!(
            staff_id = %staff_id,
            date = %date,
            has_exception = exception.is_some(),
            window = ?window,
            "Resolved working window"
        );
        Ok(window)
    }
}
