//! # API del socio
//!
//! Saldo de puntos, últimos movimientos y tickets de reseña del socio
//! autenticado.

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use serde::Serialize;

use super::auth::authenticate_member;
use super::{parse_id, rfc3339, AppResult};
use crate::db::models::{LedgerEntryType, PointLedgerEntry, ReviewTicket, ReviewTicketStatus};
use crate::engine::Engine;

#[derive(Serialize)]
struct LedgerEntryResponse {
    id: String,
    #[serde(rename = "type")]
    entry_type: LedgerEntryType,
    points: i64,
    balance_after: i64,
    created_at: String,
}

impl From<PointLedgerEntry> for LedgerEntryResponse {
    fn from(e: PointLedgerEntry) -> Self {
        LedgerEntryResponse {
            id: e.id.to_hex(),
            entry_type: e.entry_type,
            points: e.points,
            balance_after: e.balance_after,
            created_at: rfc3339(e.created_at),
        }
    }
}

#[derive(Serialize)]
struct ReviewTicketResponse {
    id: String,
    status: ReviewTicketStatus,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    used_at: Option<String>,
}

impl From<ReviewTicket> for ReviewTicketResponse {
    fn from(t: ReviewTicket) -> Self {
        ReviewTicketResponse {
            id: t.id.to_hex(),
            status: t.status,
            created_at: rfc3339(t.created_at),
            used_at: t.used_at.map(rfc3339),
        }
    }
}

#[derive(Serialize)]
struct MemberResponse {
    id: String,
    display_name: String,
    points_balance: i64,
    ledger: Vec<LedgerEntryResponse>,
    review_tickets: Vec<ReviewTicketResponse>,
}

/// Resumen del socio: saldo, los 50 movimientos más recientes y tickets
#[get("/members/me")]
async fn me(engine: web::Data<Engine>, req: HttpRequest) -> AppResult<impl Responder> {
    let member = authenticate_member(&engine, &req).await?;
    let summary = engine.member_summary(member.id).await?;

    Ok(HttpResponse::Ok().json(MemberResponse {
        id: summary.member.id.to_hex(),
        display_name: summary.member.display_name,
        points_balance: summary.member.points_balance,
        ledger: summary.ledger.into_iter().map(Into::into).collect(),
        review_tickets: summary.review_tickets.into_iter().map(Into::into).collect(),
    }))
}

/// Usa un ticket de reseña. Solo funciona una vez.
#[post("/members/me/review-tickets/{id}/use")]
async fn use_review_ticket(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let member = authenticate_member(&engine, &req).await?;
    let ticket_id = parse_id("id", &path)?;
    let ticket = engine.use_review_ticket(&member, ticket_id).await?;
    Ok(HttpResponse::Ok().json(ReviewTicketResponse::from(ticket)))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(me);
    cfg.service(use_review_ticket);
}
