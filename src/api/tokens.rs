//! # API de QR
//!
//! El operador emite un QR y consulta su estado hasta que el socio lo
//! escanea; el socio lo canjea desde la mini-app.

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use super::auth::{authenticate_member, authenticate_operator};
use super::{rfc3339, AppResult};
use crate::db::models::{Token, TokenKind, TokenStatus};
use crate::engine::Engine;

#[derive(Deserialize)]
struct IssueTokenRequest {
    kind: TokenKind,
    points_amount: Option<i64>,
}

#[derive(Deserialize)]
struct RedeemRequest {
    token: String,
    /// Puntos a gastar (solo `spend`)
    amount: Option<i64>,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
    kind: TokenKind,
    status: TokenStatus,
    points_amount: Option<i64>,
    expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    member_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
}

impl From<Token> for TokenResponse {
    fn from(t: Token) -> Self {
        TokenResponse {
            token: t.token,
            kind: t.kind,
            status: t.status,
            points_amount: t.points_amount,
            expires_at: rfc3339(t.expires_at),
            member_id: t.member_id.map(|id| id.to_hex()),
            completed_at: t.completed_at.map(rfc3339),
        }
    }
}

#[derive(Serialize)]
struct RedeemResponse {
    kind: TokenKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_ticket_id: Option<String>,
}

/// Emite un QR de un solo uso
///
/// # Respuesta
/// ```json
/// { "token": "4n1...", "kind": "earn", "status": "pending", "points_amount": 50,
///   "expires_at": "2026-10-16T00:05:00Z" }
/// ```
#[post("/tokens")]
async fn issue_token(
    engine: web::Data<Engine>,
    data: web::Json<IssueTokenRequest>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let operator = authenticate_operator(&engine, &req).await?;
    let token = engine
        .issue_token(&operator, data.kind, data.points_amount)
        .await?;
    Ok(HttpResponse::Created().json(TokenResponse::from(token)))
}

/// Estado efectivo del QR. La pantalla del operador lo consulta hasta que
/// deja de estar `pending`.
#[get("/tokens/{token}")]
async fn token_status(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    authenticate_operator(&engine, &req).await?;
    let token = engine.token_status(&path).await?;
    Ok(HttpResponse::Ok().json(TokenResponse::from(token)))
}

/// Canje por el socio
///
/// # Errores
/// - `400 Bad Request`: `amount_required`, `insufficient_balance`
/// - `404 Not Found`: `token_not_found`
/// - `409 Conflict`: `token_already_used`
/// - `410 Gone`: `token_expired`
/// - `503 Service Unavailable`: el QR está bloqueado por otro canje
#[post("/tokens/redeem")]
async fn redeem_token(
    engine: web::Data<Engine>,
    data: web::Json<RedeemRequest>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let member = authenticate_member(&engine, &req).await?;
    let outcome = engine
        .redeem(&member, data.token.trim(), data.amount)
        .await?;

    Ok(HttpResponse::Ok().json(RedeemResponse {
        kind: outcome.kind,
        new_balance: outcome.new_balance,
        review_ticket_id: outcome.review_ticket.map(|t| t.id.to_hex()),
    }))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(redeem_token);
    cfg.service(issue_token);
    cfg.service(token_status);
}
