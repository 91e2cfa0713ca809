use async_trait::async_trait;
use chrono::NaiveDate;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::{Acknowledgment, ReadConcern, ReturnDocument, WriteConcern};
use mongodb::{Client, ClientSession, Collection, Database};

use super::models::{
    Member, Operator, PointLedgerEntry, Reservation, ReservationStatus, ReviewTicket,
    ScheduleException, Service, StaffSchedule, StaffService, Token, TokenStatus,
};
use super::store::{StatusChange, Store, StoreTx};
use crate::api::middleware::ErrorLogExt;
use crate::api::AppError;
use crate::config::MongoConfig;

pub type Result<T> = std::result::Result<T, AppError>;

const WRITE_CONFLICT: i32 = 112;
const DUPLICATE_KEY: i32 = 11000;

/// Reservas que no liberan su hueco
const SLOT_HOLDING: [&str; 4] = ["pending", "confirmed", "in_progress", "completed"];

#[derive(Debug, Clone)]
pub struct MongoRepo {
    pub client: Client,
    pub database: Database,
}

impl MongoRepo {
    pub async fn init(config: &MongoConfig) -> Result<MongoRepo> {
        let client = Client::with_uri_str(&config.uri)
            .await
            .map_err(|e| AppError::Internal(format!("Error conectando a MongoDB: {}", e)))?;

        let database = client.database(&config.database);

        // Test connection
        database
            .run_command(doc! {"ping": 1})
            .await
            .log_error_context("pinging MongoDB")
            .map_err(|e| AppError::Internal(format!("Error validando conexión MongoDB: {}", e)))?;

        tracing::info!(database = %config.database, "Conexión a MongoDB establecida exitosamente");

        Ok(MongoRepo { client, database })
    }

    pub fn staff_schedules(&self) -> Collection<StaffSchedule> {
        self.database.collection("staff_schedules")
    }

    pub fn schedule_exceptions(&self) -> Collection<ScheduleException> {
        self.database.collection("schedule_exceptions")
    }

    pub fn services(&self) -> Collection<Service> {
        self.database.collection("services")
    }

    pub fn staff_services(&self) -> Collection<StaffService> {
        self.database.collection("staff_services")
    }

    pub fn reservations(&self) -> Collection<Reservation> {
        self.database.collection("reservations")
    }

    pub fn members(&self) -> Collection<Member> {
        self.database.collection("members")
    }

    pub fn operators(&self) -> Collection<Operator> {
        self.database.collection("operators")
    }

    pub fn tokens(&self) -> Collection<Token> {
        self.database.collection("qr_sessions")
    }

    pub fn ledger_entries(&self) -> Collection<PointLedgerEntry> {
        self.database.collection("point_transactions")
    }

    pub fn review_tickets_coll(&self) -> Collection<ReviewTicket> {
        self.database.collection("review_tickets")
    }

    /// Un documento por (profesional, fecha) que serializa las reservas de ese día
    pub fn day_locks(&self) -> Collection<Document> {
        self.database.collection("day_locks")
    }

    pub async fn create_indexes(&self) -> Result<()> {
        use mongodb::{options::IndexOptions, IndexModel};

        let unique = || IndexOptions::builder().unique(true).build();

        self.staff_schedules()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "staff_id": 1, "day_of_week": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_index_staff_schedules", e))?;

        self.schedule_exceptions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "staff_id": 1, "date": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_index_schedule_exceptions", e))?;

        self.staff_services()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "staff_id": 1, "service_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_index_staff_services", e))?;

        self.reservations()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "staff_id": 1, "date": 1 })
                    .build(),
                IndexModel::builder().keys(doc! { "member_id": 1 }).build(),
            ])
            .await
            .map_err(|e| AppError::database("create_index_reservations", e))?;

        self.members()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "line_user_id": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "access_token": 1 })
                    .options(unique())
                    .build(),
            ])
            .await
            .map_err(|e| AppError::database("create_index_members", e))?;

        self.operators()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "access_token": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_index_operators", e))?;

        self.tokens()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "token": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_index_qr_sessions", e))?;

        self.ledger_entries()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "member_id": 1, "created_at": -1 })
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_index_point_transactions", e))?;

        self.review_tickets_coll()
            .create_index(IndexModel::builder().keys(doc! { "member_id": 1 }).build())
            .await
            .map_err(|e| AppError::database("create_index_review_tickets", e))?;

        self.day_locks()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "staff_id": 1, "date": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_index_day_locks", e))?;

        tracing::info!("Índices MongoDB creados exitosamente");
        Ok(())
    }
}

/// Dentro de una transacción, un conflicto de escritura (o la clave única del
/// documento de bloqueo) significa que otra transacción tiene el mismo ámbito.
fn is_contention(e: &mongodb::error::Error) -> bool {
    if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        return true;
    }
    match e.kind.as_ref() {
        ErrorKind::Command(c) => c.code == WRITE_CONFLICT || c.code == DUPLICATE_KEY,
        ErrorKind::Write(WriteFailure::WriteError(w)) => w.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn tx_error(operation: &str, scope: &str, e: mongodb::error::Error) -> AppError {
    if is_contention(&e) {
        tracing::debug!(operation = %operation, scope = %scope, error = %e, "Transaction write conflict");
        AppError::lock_contention(scope)
    } else {
        AppError::database(operation, e)
    }
}

#[async_trait]
impl Store for MongoRepo {
    async fn operator_by_token(&self, access_token: &str) -> Result<Option<Operator>> {
        self.operators()
            .find_one(doc! { "access_token": access_token })
            .await
            .map_err(|e| AppError::database("operator_by_token", e))
    }

    async fn member_by_token(&self, access_token: &str) -> Result<Option<Member>> {
        self.members()
            .find_one(doc! { "access_token": access_token })
            .await
            .map_err(|e| AppError::database("member_by_token", e))
    }

    async fn member(&self, id: ObjectId) -> Result<Option<Member>> {
        self.members()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| AppError::database("find_member", e))
    }

    async fn weekly_schedule(
        &self,
        staff_id: ObjectId,
        day_of_week: i32,
    ) -> Result<Option<StaffSchedule>> {
        self.staff_schedules()
            .find_one(doc! { "staff_id": staff_id, "day_of_week": day_of_week })
            .await
            .map_err(|e| AppError::database("find_staff_schedule", e))
    }

    async fn schedule_exception(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> Result<Option<ScheduleException>> {
        self.schedule_exceptions()
            .find_one(doc! { "staff_id": staff_id, "date": date.to_string() })
            .await
            .map_err(|e| AppError::database("find_schedule_exception", e))
    }

    async fn service(&self, id: ObjectId) -> Result<Option<Service>> {
        self.services()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| AppError::database("find_service", e))
    }

    async fn staff_offers_service(&self, staff_id: ObjectId, service_id: ObjectId) -> Result<bool> {
        let link = self
            .staff_services()
            .find_one(doc! { "staff_id": staff_id, "service_id": service_id })
            .await
            .map_err(|e| AppError::database("find_staff_service", e))?;
        Ok(link.is_some())
    }

    async fn active_reservations(
        &self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>> {
        let mut cursor = self
            .reservations()
            .find(doc! {
                "staff_id": staff_id,
                "date": date.to_string(),
                "status": { "$in": SLOT_HOLDING.to_vec() },
            })
            .sort(doc! { "start_time": 1 })
            .await
            .map_err(|e| AppError::database("find_active_reservations", e))?;

        let mut results = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| AppError::database("iterate_reservations", e))?
        {
            let reservation = cursor
                .deserialize_current()
                .map_err(|e| AppError::database("deserialize_reservation", e))?;
            results.push(reservation);
        }
        Ok(results)
    }

    async fn reservation(&self, id: ObjectId) -> Result<Option<Reservation>> {
        self.reservations()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| AppError::database("find_reservation", e))
    }

    async fn transition_reservation(
        &self,
        id: ObjectId,
        from: ReservationStatus,
        change: &StatusChange,
    ) -> Result<Option<Reservation>> {
        let mut set = doc! {
            "status": change.to.as_str(),
            "updated_at": change.at,
        };
        if change.to == ReservationStatus::Cancelled {
            set.insert("cancel_reason", change.cancel_reason.clone());
            set.insert("cancelled_at", change.at);
        }

        self.reservations()
            .find_one_and_update(doc! { "_id": id, "status": from.as_str() }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| AppError::database("transition_reservation", e))
    }

    async fn insert_token(&self, token: &Token) -> Result<()> {
        self.tokens()
            .insert_one(token)
            .await
            .map_err(|e| AppError::database("insert_qr_session", e))?;
        Ok(())
    }

    async fn token(&self, value: &str) -> Result<Option<Token>> {
        self.tokens()
            .find_one(doc! { "token": value })
            .await
            .map_err(|e| AppError::database("find_qr_session", e))
    }

    async fn expire_token(&self, id: ObjectId) -> Result<bool> {
        let result = self
            .tokens()
            .update_one(
                doc! { "_id": id, "status": "pending" },
                doc! { "$set": { "status": "expired" } },
            )
            .await
            .map_err(|e| AppError::database("expire_qr_session", e))?;
        Ok(result.modified_count == 1)
    }

    async fn ledger(&self, member_id: ObjectId, limit: i64) -> Result<Vec<PointLedgerEntry>> {
        let mut cursor = self
            .ledger_entries()
            .find(doc! { "member_id": member_id })
            .sort(doc! { "created_at": -1, "_id": -1 })
            .limit(limit)
            .await
            .map_err(|e| AppError::database("find_ledger", e))?;

        let mut results = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| AppError::database("iterate_ledger", e))?
        {
            results.push(
                cursor
                    .deserialize_current()
                    .map_err(|e| AppError::database("deserialize_ledger_entry", e))?,
            );
        }
        Ok(results)
    }

    async fn review_tickets(&self, member_id: ObjectId) -> Result<Vec<ReviewTicket>> {
        let mut cursor = self
            .review_tickets_coll()
            .find(doc! { "member_id": member_id })
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(|e| AppError::database("find_review_tickets", e))?;

        let mut results = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| AppError::database("iterate_review_tickets", e))?
        {
            results.push(
                cursor
                    .deserialize_current()
                    .map_err(|e| AppError::database("deserialize_review_ticket", e))?,
            );
        }
        Ok(results)
    }

    async fn use_review_ticket(
        &self,
        member_id: ObjectId,
        ticket_id: ObjectId,
        at: i64,
    ) -> Result<Option<ReviewTicket>> {
        self.review_tickets_coll()
            .find_one_and_update(
                doc! { "_id": ticket_id, "member_id": member_id, "status": "unused" },
                doc! { "$set": { "status": "used", "used_at": at } },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| AppError::database("use_review_ticket", e))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| AppError::database("start_session", e))?;

        session
            .start_transaction()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .await
            .map_err(|e| AppError::database("start_transaction", e))?;

        Ok(Box::new(MongoTx {
            repo: self.clone(),
            session,
        }))
    }
}

/// Transacción de MongoDB. Si se descarta sin `commit`, el driver la aborta.
pub struct MongoTx {
    repo: MongoRepo,
    session: ClientSession,
}

#[async_trait]
impl StoreTx for MongoTx {
    async fn lock_staff_day(&mut self, staff_id: ObjectId, date: NaiveDate) -> Result<()> {
        let scope = format!("staff {} / {}", staff_id, date);
        self.repo
            .day_locks()
            .update_one(
                doc! { "staff_id": staff_id, "date": date.to_string() },
                doc! { "$inc": { "version": 1_i64 } },
            )
            .upsert(true)
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("lock_staff_day", &scope, e))?;
        Ok(())
    }

    async fn active_reservations(
        &mut self,
        staff_id: ObjectId,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>> {
        let mut cursor = self
            .repo
            .reservations()
            .find(doc! {
                "staff_id": staff_id,
                "date": date.to_string(),
                "status": { "$in": SLOT_HOLDING.to_vec() },
            })
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("find_active_reservations", "reservations", e))?;

        let mut results = Vec::new();
        while cursor
            .advance(&mut self.session)
            .await
            .map_err(|e| tx_error("iterate_reservations", "reservations", e))?
        {
            results.push(
                cursor
                    .deserialize_current()
                    .map_err(|e| AppError::database("deserialize_reservation", e))?,
            );
        }
        Ok(results)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        self.repo
            .reservations()
            .insert_one(reservation)
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("insert_reservation", "reservations", e))?;
        Ok(())
    }

    async fn lock_token(&mut self, value: &str) -> Result<Option<Token>> {
        self.repo
            .tokens()
            .find_one_and_update(
                doc! { "token": value },
                doc! { "$inc": { "lock_version": 1_i64 } },
            )
            .return_document(ReturnDocument::After)
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("lock_qr_session", "qr_session", e))
    }

    async fn save_token(&mut self, token: &Token) -> Result<()> {
        let status = match token.status {
            TokenStatus::Pending => "pending",
            TokenStatus::Completed => "completed",
            TokenStatus::Expired => "expired",
        };
        self.repo
            .tokens()
            .update_one(
                doc! { "_id": token.id },
                doc! { "$set": {
                    "status": status,
                    "member_id": token.member_id,
                    "completed_at": token.completed_at,
                } },
            )
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("save_qr_session", "qr_session", e))?;
        Ok(())
    }

    async fn lock_member(&mut self, id: ObjectId) -> Result<Option<Member>> {
        self.repo
            .members()
            .find_one_and_update(doc! { "_id": id }, doc! { "$inc": { "lock_version": 1_i64 } })
            .return_document(ReturnDocument::After)
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("lock_member", "member", e))
    }

    async fn set_points_balance(&mut self, member_id: ObjectId, balance: i64) -> Result<()> {
        self.repo
            .members()
            .update_one(
                doc! { "_id": member_id },
                doc! { "$set": { "points_balance": balance } },
            )
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("set_points_balance", "member", e))?;
        Ok(())
    }

    async fn append_ledger(&mut self, entry: &PointLedgerEntry) -> Result<()> {
        self.repo
            .ledger_entries()
            .insert_one(entry)
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("append_ledger", "point_transactions", e))?;
        Ok(())
    }

    async fn insert_review_ticket(&mut self, ticket: &ReviewTicket) -> Result<()> {
        self.repo
            .review_tickets_coll()
            .insert_one(ticket)
            .session(&mut self.session)
            .await
            .map_err(|e| tx_error("insert_review_ticket", "review_tickets", e))?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.session
            .commit_transaction()
            .await
            .map_err(|e| tx_error("commit_transaction", "commit", e))
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.session
            .abort_transaction()
            .await
            .log_error_level(tracing::Level::WARN)
            .map_err(|e| AppError::database("abort_transaction", e))
    }
}
