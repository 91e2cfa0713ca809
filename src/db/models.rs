//! Documentos persistidos en MongoDB.
//!
//! Las fechas se guardan como `YYYY-MM-DD` y las horas como `HH:MM:SS`
//! (serialización de chrono); los instantes como timestamp unix en segundos.

use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Horario semanal de un profesional. Un documento por día de la semana.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaffSchedule {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub staff_id: ObjectId,
    /// 0 = domingo ... 6 = sábado
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
}

/// Excepción para una fecha concreta; sustituye por completo al horario semanal.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScheduleException {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub staff_id: ObjectId,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_available: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Service {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub duration_minutes: i32,
    pub price: i64,
    pub is_active: bool,
}

/// Vínculo explícito profesional ↔ servicio
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaffService {
    pub staff_id: ObjectId,
    pub service_id: ObjectId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    /// Una reserva cancelada o sin presentarse libera su hueco
    pub fn holds_slot(self) -> bool {
        !matches!(self, Self::Cancelled | Self::NoShow)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Reservation {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub staff_id: ObjectId,
    pub service_id: ObjectId,
    pub member_id: ObjectId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// Calculada al crear la reserva y nunca recalculada
    pub end_time: NaiveTime,
    pub status: ReservationStatus,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64, // timestamp unix
    pub updated_at: i64, // timestamp unix
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Member {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub line_user_id: String,
    pub display_name: String,
    pub access_token: String,
    pub points_balance: i64,
    pub created_at: i64,
}

/// Personal de tienda autenticado que emite QR y gestiona reservas
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Operator {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Earn,
    Spend,
    ReviewTicket,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Spend => "spend",
            Self::ReviewTicket => "review_ticket",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Pending,
    Completed,
    Expired,
}

/// Sesión QR de un solo uso
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Token {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub kind: TokenKind,
    pub token: String,
    /// Solo para `earn`
    pub points_amount: Option<i64>,
    pub status: TokenStatus,
    pub member_id: Option<ObjectId>,
    pub expires_at: i64,
    pub issued_by: ObjectId,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Earn,
    Spend,
}

/// Movimiento de puntos. Solo se añaden, nunca se modifican.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PointLedgerEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub member_id: ObjectId,
    #[serde(rename = "type")]
    pub entry_type: LedgerEntryType,
    pub points: i64,
    pub balance_after: i64,
    pub source_token: Option<ObjectId>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTicketStatus {
    Unused,
    Used,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReviewTicket {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub member_id: ObjectId,
    pub source_token: ObjectId,
    pub status: ReviewTicketStatus,
    pub created_at: i64,
    pub used_at: Option<i64>,
}
