//! Ciclo de vida de una reserva.
//!
//! ```text
//! pending ──confirm──> confirmed ──start──> in_progress ──complete──> completed
//!    │                    │
//!    ├──cancel / no_show──┴──> cancelled | no_show
//! ```
//!
//! `completed`, `cancelled` y `no_show` son terminales. El socio solo puede
//! cancelar sus propias reservas; el resto de transiciones son del personal.

use mongodb::bson::oid::ObjectId;

use super::Engine;
use crate::api::{AppError, AppResult};
use crate::db::models::{Reservation, ReservationStatus};
use crate::db::store::StatusChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Confirm,
    Start,
    Complete,
    Cancel,
    NoShow,
}

impl LifecycleAction {
    /// Segmento de ruta: `confirm`, `start`, `complete`, `cancel`, `no-show`
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "confirm" => Some(Self::Confirm),
            "start" => Some(Self::Start),
            "complete" => Some(Self::Complete),
            "cancel" => Some(Self::Cancel),
            "no-show" => Some(Self::NoShow),
            _ => None,
        }
    }

    pub fn target(self) -> ReservationStatus {
        match self {
            Self::Confirm => ReservationStatus::Confirmed,
            Self::Start => ReservationStatus::InProgress,
            Self::Complete => ReservationStatus::Completed,
            Self::Cancel => ReservationStatus::Cancelled,
            Self::NoShow => ReservationStatus::NoShow,
        }
    }
}

pub fn next_status(from: ReservationStatus, action: LifecycleAction) -> Option<ReservationStatus> {
    use LifecycleAction as A;
    use ReservationStatus as S;

    match (from, action) {
        (S::Pending, A::Confirm) => Some(S::Confirmed),
        (S::Confirmed, A::Start) => Some(S::InProgress),
        (S::InProgress, A::Complete) => Some(S::Completed),
        (S::Pending | S::Confirmed, A::Cancel) => Some(S::Cancelled),
        (S::Pending | S::Confirmed, A::NoShow) => Some(S::NoShow),
        _ => None,
    }
}

/// Quién pide el cambio de estado
#[derive(Debug, Clone, Copy)]
pub enum Actor {
    Operator(ObjectId),
    Member(ObjectId),
}

impl Engine {
    pub async fn transition_reservation(
        &self,
        reservation_id: ObjectId,
        actor: Actor,
        action: LifecycleAction,
        reason: Option<String>,
    ) -> AppResult<Reservation> {
        let not_found = || AppError::not_found_id("Reserva", &reservation_id.to_hex());
        let current = self
            .store
            .reservation(reservation_id)
            .await?
            .ok_or_else(not_found)?;

        if let Actor::Member(member_id) = actor {
            if current.member_id != member_id {
                return Err(not_found());
            }
            if action != LifecycleAction::Cancel {
                return Err(AppError::Unauthorized(
                    "Solo el personal puede cambiar el estado de la reserva".to_string(),
                ));
            }
        }

        let to = next_status(current.status, action).ok_or_else(|| AppError::InvalidTransition {
            from: current.status.to_string(),
            to: action.target().to_string(),
        })?;

        let change = StatusChange {
            to,
            cancel_reason: if to == ReservationStatus::Cancelled {
                reason.filter(|r| !r.trim().is_empty())
            } else {
                None
            },
            at: self.now().timestamp(),
        };

        let updated = self
            .store
            .transition_reservation(reservation_id, current.status, &change)
            .await?
            .ok_or_else(|| {
                AppError::Conflict("La reserva cambió de estado mientras se procesaba".to_string())
            })?;

        tracing::info!(
            reservation_id = %reservation_id,
            actor = ?actor,
            from = %current.status,
            status = %updated.status,
            "Reservation status changed"
        );

        let when = format!(
            "{} a las {}",
            updated.date.format("%d/%m/%Y"),
            updated.start_time.format("%H:%M")
        );
        match updated.status {
            ReservationStatus::Confirmed => self.notify_member(
                updated.member_id,
                format!("Tu reserva del {} está confirmada. ¡Te esperamos!", when),
            ),
            ReservationStatus::Cancelled => self.notify_member(
                updated.member_id,
                match &updated.cancel_reason {
                    Some(reason) => format!("Tu reserva del {} ha sido cancelada: {}", when, reason),
                    None => format!("Tu reserva del {} ha sido cancelada.", when),
                },
            ),
            _ => {}
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::booking::BookingRequest;
    use crate::engine::testing::{harness, monday, salon, t, Harness, Salon};
    use tokio_test::{assert_err, assert_ok};

    async fn booked(h: &Harness, s: &Salon) -> Reservation {
        let req = BookingRequest {
            staff_id: s.staff_id,
            service_id: s.service.id,
            date: monday(),
            start_time: t(11, 0),
            notes: Some("primera visita".to_string()),
        };
        h.engine.book(&s.member, req).await.unwrap()
    }

    #[test]
    fn transition_table() {
        use LifecycleAction as A;
        use ReservationStatus as S;

        assert_eq!(next_status(S::Pending, A::Confirm), Some(S::Confirmed));
        assert_eq!(next_status(S::Confirmed, A::Start), Some(S::InProgress));
        assert_eq!(next_status(S::InProgress, A::Complete), Some(S::Completed));
        assert_eq!(next_status(S::Confirmed, A::NoShow), Some(S::NoShow));
        assert_eq!(next_status(S::Pending, A::Complete), None);
        assert_eq!(next_status(S::InProgress, A::Cancel), None);

        for terminal in [S::Completed, S::Cancelled, S::NoShow] {
            assert!(terminal.is_terminal());
            for action in [A::Confirm, A::Start, A::Complete, A::Cancel, A::NoShow] {
                assert_eq!(next_status(terminal, action), None);
            }
        }
    }

    #[test]
    fn path_segments() {
        assert_eq!(LifecycleAction::from_path("no-show"), Some(LifecycleAction::NoShow));
        assert_eq!(LifecycleAction::from_path("confirm"), Some(LifecycleAction::Confirm));
        assert_eq!(LifecycleAction::from_path("reopen"), None);
    }

    #[tokio::test]
    async fn operator_walks_the_happy_path() {
        let h = harness();
        let s = salon(&h);
        let r = booked(&h, &s).await;
        let op = Actor::Operator(s.operator.id);

        for (action, expected) in [
            (LifecycleAction::Confirm, ReservationStatus::Confirmed),
            (LifecycleAction::Start, ReservationStatus::InProgress),
            (LifecycleAction::Complete, ReservationStatus::Completed),
        ] {
            let updated =
                assert_ok!(h.engine.transition_reservation(r.id, op, action, None).await);
            assert_eq!(updated.status, expected);
        }

        let err = assert_err!(
            h.engine
                .transition_reservation(r.id, op, LifecycleAction::Cancel, None)
                .await
        );
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn member_cancels_own_reservation_with_reason() {
        let h = harness();
        let s = salon(&h);
        let r = booked(&h, &s).await;

        let cancelled = assert_ok!(
            h.engine
                .transition_reservation(
                    r.id,
                    Actor::Member(s.member.id),
                    LifecycleAction::Cancel,
                    Some("me surgió un imprevisto".to_string()),
                )
                .await
        );
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("me surgió un imprevisto"));
        assert!(cancelled.cancelled_at.is_some());
        // campos de la reserva intactos
        assert_eq!(cancelled.end_time, r.end_time);
    }

    #[tokio::test]
    async fn member_cannot_touch_other_reservations_or_confirm() {
        let h = harness();
        let s = salon(&h);
        let r = booked(&h, &s).await;
        let stranger = h.store.add_member("Taro", 0);

        let err = assert_err!(
            h.engine
                .transition_reservation(r.id, Actor::Member(stranger.id), LifecycleAction::Cancel, None)
                .await
        );
        assert!(matches!(err, AppError::NotFoundWithId { .. }));

        let err = assert_err!(
            h.engine
                .transition_reservation(r.id, Actor::Member(s.member.id), LifecycleAction::Confirm, None)
                .await
        );
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn member_cannot_cancel_once_in_progress() {
        let h = harness();
        let s = salon(&h);
        let r = booked(&h, &s).await;
        let op = Actor::Operator(s.operator.id);
        assert_ok!(h.engine.transition_reservation(r.id, op, LifecycleAction::Confirm, None).await);
        assert_ok!(h.engine.transition_reservation(r.id, op, LifecycleAction::Start, None).await);

        let err = assert_err!(
            h.engine
                .transition_reservation(r.id, Actor::Member(s.member.id), LifecycleAction::Cancel, None)
                .await
        );
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn confirm_and_cancel_notify_the_member() {
        let h = harness();
        let s = salon(&h);
        let r = booked(&h, &s).await;
        // aviso de reserva recibida
        h.notifier.wait_for(1).await;

        let op = Actor::Operator(s.operator.id);
        assert_ok!(h.engine.transition_reservation(r.id, op, LifecycleAction::Confirm, None).await);
        let sent = h.notifier.wait_for(2).await;
        assert!(sent[1].1.contains("confirmada"));

        assert_ok!(
            h.engine
                .transition_reservation(r.id, op, LifecycleAction::Cancel, Some("cierre".into()))
                .await
        );
        let sent = h.notifier.wait_for(3).await;
        assert!(sent[2].1.contains("cancelada: cierre"));
    }

    #[tokio::test]
    async fn unknown_reservation_is_not_found() {
        let h = harness();
        let s = salon(&h);
        let err = assert_err!(
            h.engine
                .transition_reservation(
                    ObjectId::new(),
                    Actor::Operator(s.operator.id),
                    LifecycleAction::Confirm,
                    None
                )
                .await
        );
        assert!(matches!(err, AppError::NotFoundWithId { .. }));
    }
}
