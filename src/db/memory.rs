//! Almacén en memoria para los tests.
//!
//! Cada ámbito de bloqueo (profesional+día, QR, socio) es un
//! `tokio::sync::Mutex` que se espera como mucho `lock_timeout`. Las escrituras
//! de una transacción se acumulan y se aplican de golpe en `commit`, antes de
//! soltar los bloqueos.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use super::models::{
    Member, Operator, PointLedgerEntry, Reservation, ReservationStatus, ReviewTicket,
    ReviewTicketStatus, ScheduleException, Service, StaffSchedule, Token, TokenStatus,
};
use super::store::{StatusChange, Store, StoreTx};
use crate::api::{AppError, AppResult};

#[derive(Default)]
struct State {
    operators: Vec<Operator>,
    members: HashMap<ObjectId, Member>,
    schedules: Vec<StaffSchedule>,
    exceptions: Vec<ScheduleException>,
    services: HashMap<ObjectId, Service>,
    staff_services: HashSet<(ObjectId, ObjectId)>,
    reservations: Vec<Reservation>,
    tokens: HashMap<ObjectId, Token>,
    ledger: Vec<PointLedgerEntry>,
    tickets: Vec<ReviewTicket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    StaffDay(ObjectId, NaiveDate),
    Token(String),
    Member(ObjectId),
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::default(),
            locks: Arc::default(),
            lock_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_operator(&self, name: &str) -> Operator {
        let operator = Operator {
            id: ObjectId::new(),
            name: name.to_string(),
            access_token: format!("op-{}", ObjectId::new().to_hex()),
        };
        self.state().operators.push(operator.clone());
        operator
    }

    pub fn add_member(&self, display_name: &str, points_balance: i64) -> Member {
        let member = Member {
            id: ObjectId::new(),
            line_user_id: format!("U{}", ObjectId::new().to_hex()),
            display_name: display_name.to_string(),
            access_token: format!("mb-{}", ObjectId::new().to_hex()),
            points_balance,
            created_at: 0,
        };
        self.state().members.insert(member.id, member.clone());
        member
    }

    pub fn add_service(&self, name: &str, duration_minutes: i32) -> Service {
        let service = Service {
            id: ObjectId::new(),
            name: name.to_string(),
            duration_minutes,
            price: 5000,
            is_active: true,
        };
        self.state().services.insert(service.id, service.clone());
        service
    }

    pub fn set_service_active(&self, service_id: ObjectId, is_active: bool) {
        if let Some(service) = self.state().services.get_mut(&service_id) {
            service.is_active = is_active;
        }
    }

    pub fn link_service(&self, staff_id: ObjectId, service_id: ObjectId) {
        self.state().staff_services.insert((staff_id, service_id));
    }

    pub fn set_weekly(
        &self,
        staff_id: ObjectId,
        day_of_week: i32,
        start: NaiveTime,
        end: NaiveTime,
        is_available: bool,
    ) {
        let mut state = self.state();
        state
            .schedules
            .retain(|s| !(s.staff_id == staff_id && s.day_of_week == day_of_week));
        state.schedules.push(StaffSchedule {
            id: ObjectId::new(),
            staff_id,
            day_of_week,
            start_time: start,
            end_time: end,
            is_available,
        });
    }

    pub fn add_exception(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
        times: Option<(NaiveTime, NaiveTime)>,
        is_available: bool,
    ) {
        self.state().exceptions.push(ScheduleException {
            id: ObjectId::new(),
            staff_id,
            date,
            start_time: times.map(|t| t.0),
            end_time: times.map(|t| t.1),
            is_available,
            reason: Some("vacaciones".to_string()),
        });
    }

    pub fn put_reservation(&self, reservation: Reservation) {
        self.state().reservations.push(reservation);
    }

    pub fn all_reservations(&self, staff_id: ObjectId, date: NaiveDate) -> Vec<Reservation> {
        self.state()
            .reservations
            .iter()
            .filter(|r| r.staff_id == staff_id && r.date == date)
            .cloned()
            .collect()
    }

    pub fn token_by_id(&self, id: ObjectId) -> Option<Token> {
        self.state().tokens.get(&id).cloned()
    }

    pub fn balance(&self, member_id: ObjectId) -> i64 {
        self.state()
            .members
            .get(&member_id)
            .map(|m| m.points_balance)
            .unwrap_or_default()
    }

    fn lock_for(&self, key: &LockKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn operator_by_token(&self, access_token: &str) -> AppResult<Option<Operator>> {
        Ok(self
            .state()
            .operators
            .iter()
            .find(|o| o.access_token == access_token)
            .cloned())
    }

    async fn member_by_token(&self, access_token: &str) -> AppResult<Option<Member>> {
        Ok(self
            .state()
            .members
            .values()
            .find(|m| m.access_token == access_token)
            .cloned())
    }

    async fn member(&self, id: ObjectId) -> AppResult<Option<Member>> {
        Ok(self.state().members.get(&id).cloned())
    }

    async fn weekly_schedule(
        &self,
        staff_id: ObjectId,
        day_of_week: i32,
    ) -> AppResult<Option<StaffSchedule>> {
        Ok(self
            .state()
            .schedules
            .iter()
            .find(|s| s.staff_id == staff_id && s.day_of_week == day_of_week)
            .cloned())
    }

    async fn schedule_exception(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> AppResult<Option<ScheduleException>> {
        Ok(self
            .state()
            .exceptions
            .iter()
            .find(|e| e.staff_id == staff_id && e.date == date)
            .cloned())
    }

    async fn service(&self, id: ObjectId) -> AppResult<Option<Service>> {
        Ok(self.state().services.get(&id).cloned())
    }

    async fn staff_offers_service(
        &self,
        staff_id: ObjectId,
        service_id: ObjectId,
    ) -> AppResult<bool> {
        Ok(self.state().staff_services.contains(&(staff_id, service_id)))
    }

    async fn active_reservations(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> AppResult<Vec<Reservation>> {
        Ok(active_on(&self.state().reservations, staff_id, date))
    }

    async fn reservation(&self, id: ObjectId) -> AppResult<Option<Reservation>> {
        Ok(self.state().reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn transition_reservation(
        &self,
        id: ObjectId,
        from: ReservationStatus,
        change: &StatusChange,
    ) -> AppResult<Option<Reservation>> {
        let mut state = self.state();
        let Some(reservation) = state
            .reservations
            .iter_mut()
            .find(|r| r.id == id && r.status == from)
        else {
            return Ok(None);
        };
        reservation.status = change.to;
        reservation.updated_at = change.at;
        if change.to == ReservationStatus::Cancelled {
            reservation.cancel_reason = change.cancel_reason.clone();
            reservation.cancelled_at = Some(change.at);
        }
        Ok(Some(reservation.clone()))
    }

    async fn insert_token(&self, token: &Token) -> AppResult<()> {
        let mut state = self.state();
        if state.tokens.values().any(|t| t.token == token.token) {
            return Err(AppError::Conflict("token duplicado".to_string()));
        }
        state.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn token(&self, value: &str) -> AppResult<Option<Token>> {
        Ok(self
            .state()
            .tokens
            .values()
            .find(|t| t.token == value)
            .cloned())
    }

    async fn expire_token(&self, id: ObjectId) -> AppResult<bool> {
        let mut state = self.state();
        match state.tokens.get_mut(&id) {
            Some(token) if token.status == TokenStatus::Pending => {
                token.status = TokenStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ledger(&self, member_id: ObjectId, limit: i64) -> AppResult<Vec<PointLedgerEntry>> {
        let state = self.state();
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|e| e.member_id == member_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn review_tickets(&self, member_id: ObjectId) -> AppResult<Vec<ReviewTicket>> {
        Ok(self
            .state()
            .tickets
            .iter()
            .rev()
            .filter(|t| t.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn use_review_ticket(
        &self,
        member_id: ObjectId,
        ticket_id: ObjectId,
        at: i64,
    ) -> AppResult<Option<ReviewTicket>> {
        let mut state = self.state();
        let Some(ticket) = state.tickets.iter_mut().find(|t| {
            t.id == ticket_id && t.member_id == member_id && t.status == ReviewTicketStatus::Unused
        }) else {
            return Ok(None);
        };
        ticket.status = ReviewTicketStatus::Used;
        ticket.used_at = Some(at);
        Ok(Some(ticket.clone()))
    }

    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            held: HashSet::new(),
            guards: Vec::new(),
            reservations: Vec::new(),
            tokens: HashMap::new(),
            balances: HashMap::new(),
            ledger: Vec::new(),
            tickets: Vec::new(),
        }))
    }
}

fn active_on(reservations: &[Reservation], staff_id: ObjectId, date: NaiveDate) -> Vec<Reservation> {
    let mut active: Vec<Reservation> = reservations
        .iter()
        .filter(|r| r.staff_id == staff_id && r.date == date && r.status.holds_slot())
        .cloned()
        .collect();
    active.sort_by_key(|r| r.start_time);
    active
}

pub struct MemoryTx {
    store: MemoryStore,
    held: HashSet<LockKey>,
    guards: Vec<OwnedMutexGuard<()>>,
    reservations: Vec<Reservation>,
    tokens: HashMap<ObjectId, Token>,
    balances: HashMap<ObjectId, i64>,
    ledger: Vec<PointLedgerEntry>,
    tickets: Vec<ReviewTicket>,
}

impl MemoryTx {
    async fn acquire(&mut self, key: LockKey) -> AppResult<()> {
        if self.held.contains(&key) {
            return Ok(());
        }
        let mutex = self.store.lock_for(&key);
        let guard = tokio::time::timeout(self.store.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| AppError::lock_contention(format!("{:?}", key)))?;
        self.guards.push(guard);
        self.held.insert(key);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_staff_day(&mut self, staff_id: ObjectId, date: NaiveDate) -> AppResult<()> {
        self.acquire(LockKey::StaffDay(staff_id, date)).await
    }

    async fn active_reservations(
        &mut self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> AppResult<Vec<Reservation>> {
        let mut active = active_on(&self.store.state().reservations, staff_id, date);
        active.extend(active_on(&self.reservations, staff_id, date));
        Ok(active)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        self.reservations.push(reservation.clone());
        Ok(())
    }

    async fn lock_token(&mut self, value: &str) -> AppResult<Option<Token>> {
        self.acquire(LockKey::Token(value.to_string())).await?;
        if let Some(token) = self.tokens.values().find(|t| t.token == value) {
            return Ok(Some(token.clone()));
        }
        Store::token(&self.store, value).await
    }

    async fn save_token(&mut self, token: &Token) -> AppResult<()> {
        self.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn lock_member(&mut self, id: ObjectId) -> AppResult<Option<Member>> {
        self.acquire(LockKey::Member(id)).await?;
        let member = self.store.state().members.get(&id).cloned();
        Ok(member.map(|mut m| {
            if let Some(balance) = self.balances.get(&id) {
                m.points_balance = *balance;
            }
            m
        }))
    }

    async fn set_points_balance(&mut self, member_id: ObjectId, balance: i64) -> AppResult<()> {
        self.balances.insert(member_id, balance);
        Ok(())
    }

    async fn append_ledger(&mut self, entry: &PointLedgerEntry) -> AppResult<()> {
        self.ledger.push(entry.clone());
        Ok(())
    }

    async fn insert_review_ticket(&mut self, ticket: &ReviewTicket) -> AppResult<()> {
        self.tickets.push(ticket.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let tx = *self;
        {
            let mut state = tx.store.state();
            state.reservations.extend(tx.reservations);
            state.tokens.extend(tx.tokens);
            for (id, balance) in tx.balances {
                if let Some(member) = state.members.get_mut(&id) {
                    member.points_balance = balance;
                }
            }
            state.ledger.extend(tx.ledger);
            state.tickets.extend(tx.tickets);
        }
        drop(tx.guards);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
