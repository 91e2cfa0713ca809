//! Generación de huecos reservables.
//!
//! La lista es orientativa: se puede pedir las veces que se quiera y no
//! reserva nada. La comprobación definitiva se repite bajo bloqueo al reservar.

use chrono::{NaiveDate, NaiveTime, Timelike};
use mongodb::bson::oid::ObjectId;

use super::schedule::WorkingWindow;
use super::Engine;
use crate::api::{AppError, AppResult};
use crate::db::models::Reservation;

pub const DEFAULT_STEP_MINUTES: u32 = 30;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Separación entre inicios de huecos consecutivos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPolicy {
    /// Paso fijo, independiente de la duración del servicio
    FixedStep(u32),
    /// Paso igual a la duración del servicio
    ServiceDuration,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self::FixedStep(DEFAULT_STEP_MINUTES)
    }
}

impl SlotPolicy {
    fn step(self, duration: u32) -> u32 {
        match self {
            Self::FixedStep(minutes) => minutes.clamp(1, MINUTES_PER_DAY),
            Self::ServiceDuration => duration.clamp(1, MINUTES_PER_DAY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

pub fn minute_of_day(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

/// `None` a partir de medianoche: un hueco nunca cruza al día siguiente
pub fn time_at(minute: u32) -> Option<NaiveTime> {
    if minute >= MINUTES_PER_DAY {
        return None;
    }
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
}

/// Intervalo semiabierto `[start, end)` en minutos desde medianoche
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
}

impl Interval {
    pub fn of(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start: minute_of_day(start),
            end: minute_of_day(end),
        }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

impl From<&Reservation> for Interval {
    fn from(r: &Reservation) -> Self {
        Interval::of(r.start_time, r.end_time)
    }
}

#[derive(Debug, Clone)]
pub struct SlotGenerator {
    window: Option<(u32, u32)>,
    duration: u32,
    step: u32,
    busy: Vec<Interval>,
}

impl SlotGenerator {
    pub fn new(
        window: WorkingWindow,
        duration_minutes: u32,
        policy: SlotPolicy,
        busy: impl IntoIterator<Item = Interval>,
    ) -> Self {
        let window = match window {
            WorkingWindow::Open { start, end } if duration_minutes > 0 => {
                Some((minute_of_day(start), minute_of_day(end)))
            }
            _ => None,
        };
        Self {
            window,
            duration: duration_minutes,
            step: policy.step(duration_minutes),
            busy: busy.into_iter().collect(),
        }
    }

    /// Cada llamada empieza de nuevo desde el inicio de la jornada
    pub fn iter(&self) -> Slots<'_> {
        Slots {
            generator: self,
            next: self.window.map(|(start, _)| start),
        }
    }
}

impl<'a> IntoIterator for &'a SlotGenerator {
    type Item = Slot;
    type IntoIter = Slots<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Slots<'a> {
    generator: &'a SlotGenerator,
    next: Option<u32>,
}

impl Iterator for Slots<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let (_, window_end) = self.generator.window?;
        loop {
            let start = self.next?;
            let end = match start.checked_add(self.generator.duration) {
                Some(end) if end <= window_end => end,
                _ => {
                    self.next = None;
                    return None;
                }
            };
            let candidate = Interval { start, end };
            self.next = start.checked_add(self.generator.step);

            if self.generator.busy.iter().any(|b| b.overlaps(&candidate)) {
                continue;
            }
            return Some(Slot {
                start: time_at(candidate.start)?,
                end: time_at(candidate.end)?,
            });
        }
    }
}

impl Engine {
    /// Huecos libres de un profesional para un servicio en una fecha
    pub async fn available_slots(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
        service_id: ObjectId,
    ) -> AppResult<Vec<Slot>> {
        let service = self.bookable_service(staff_id, service_id).await?;

        let now = self.local_now();
        if date < now.date() {
            return Err(AppError::InvalidDate(format!("{} ya ha pasado", date)));
        }

        let window = self.working_window(staff_id, date).await?;
        if window == WorkingWindow::Closed {
            return Ok(Vec::new());
        }

        let reservations = self.store.active_reservations(staff_id, date).await?;
        let generator = SlotGenerator::new(
            window,
            service.duration_minutes.max(0) as u32,
            self.settings.slot_policy,
            reservations.iter().map(Interval::from),
        );

        let slots: Vec<Slot> = generator
            .iter()
            .filter(|slot| date > now.date() || slot.start > now.time())
            .collect();

        tracing::debug!(
            staff_id = %staff_id,
            date = %date,
            service_id = %service_id,
            busy = reservations.len(),
            slots = slots.len(),
            "Computed availability"
        );
        Ok(slots)
    }
}
