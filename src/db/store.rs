//! Contratos de persistencia que usa el motor.
//!
//! [`Store`] cubre lecturas y escrituras de un solo documento (con
//! compare-and-swap donde hace falta). [`StoreTx`] es la unidad de trabajo
//! bloqueada en la que se ejecutan la reserva de huecos y el canje de QR:
//! primero se bloquea, después se valida y solo entonces se escribe.

use async_trait::async_trait;
use chrono::NaiveDate;
use mongodb::bson::oid::ObjectId;

use super::models::{
    Member, Operator, PointLedgerEntry, Reservation, ReservationStatus, ReviewTicket,
    ScheduleException, Service, StaffSchedule, Token,
};
use crate::api::AppResult;

/// Cambio de estado de una reserva
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub to: ReservationStatus,
    pub cancel_reason: Option<String>,
    pub at: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn operator_by_token(&self, access_token: &str) -> AppResult<Option<Operator>>;
    async fn member_by_token(&self, access_token: &str) -> AppResult<Option<Member>>;
    async fn member(&self, id: ObjectId) -> AppResult<Option<Member>>;

    async fn weekly_schedule(
        &self,
        staff_id: ObjectId,
        day_of_week: i32,
    ) -> AppResult<Option<StaffSchedule>>;
    async fn schedule_exception(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> AppResult<Option<ScheduleException>>;

    async fn service(&self, id: ObjectId) -> AppResult<Option<Service>>;
    async fn staff_offers_service(&self, staff_id: ObjectId, service_id: ObjectId)
        -> AppResult<bool>;

    /// Reservas que ocupan hueco (ni canceladas ni no presentadas)
    async fn active_reservations(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> AppResult<Vec<Reservation>>;
    async fn reservation(&self, id: ObjectId) -> AppResult<Option<Reservation>>;
    /// Aplica el cambio solo si la reserva sigue en `from`. `None` si no.
    async fn transition_reservation(
        &self,
        id: ObjectId,
        from: ReservationStatus,
        change: &StatusChange,
    ) -> AppResult<Option<Reservation>>;

    async fn insert_token(&self, token: &Token) -> AppResult<()>;
    async fn token(&self, value: &str) -> AppResult<Option<Token>>;
    /// pending → expired. Devuelve `false` si ya no estaba pendiente.
    async fn expire_token(&self, id: ObjectId) -> AppResult<bool>;

    /// Movimientos más recientes primero
    async fn ledger(&self, member_id: ObjectId, limit: i64) -> AppResult<Vec<PointLedgerEntry>>;
    async fn review_tickets(&self, member_id: ObjectId) -> AppResult<Vec<ReviewTicket>>;
    /// unused → used. `None` si no existe o ya se usó.
    async fn use_review_ticket(
        &self,
        member_id: ObjectId,
        ticket_id: ObjectId,
        at: i64,
    ) -> AppResult<Option<ReviewTicket>>;

    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;
}

/// Unidad de trabajo transaccional.
///
/// Los métodos `lock_*` devuelven [`AppError::LockContention`] cuando otra
/// transacción retiene el mismo ámbito; el motor decide si reintenta.
/// Descartar la transacción sin `commit` equivale a abortarla.
///
/// [`AppError::LockContention`]: crate::api::AppError::LockContention
#[async_trait]
pub trait StoreTx: Send {
    async fn lock_staff_day(&mut self, staff_id: ObjectId, date: NaiveDate) -> AppResult<()>;
    async fn active_reservations(
        &mut self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> AppResult<Vec<Reservation>>;
    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;

    async fn lock_token(&mut self, value: &str) -> AppResult<Option<Token>>;
    async fn save_token(&mut self, token: &Token) -> AppResult<()>;

    async fn lock_member(&mut self, id: ObjectId) -> AppResult<Option<Member>>;
    async fn set_points_balance(&mut self, member_id: ObjectId, balance: i64) -> AppResult<()>;
    async fn append_ledger(&mut self, entry: &PointLedgerEntry) -> AppResult<()>;
    async fn insert_review_ticket(&mut self, ticket: &ReviewTicket) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
    async fn abort(self: Box<Self>) -> AppResult<()>;
}
