//! Canje atómico de QR.
//!
//! Orden dentro de la transacción: bloquear el QR, comprobar estado y
//! caducidad, bloquear al socio, validar saldo y solo entonces escribir saldo,
//! movimiento, ticket y QR. Un error en cualquier paso aborta todo.

use mongodb::bson::oid::ObjectId;

use super::tokens::effective_status;
use super::Engine;
use crate::api::{AppError, AppResult};
use crate::db::models::{
    LedgerEntryType, Member, PointLedgerEntry, ReviewTicket, ReviewTicketStatus, Token, TokenKind,
    TokenStatus,
};
use crate::db::store::StoreTx;

/// Movimientos que se muestran en el resumen del socio
pub const LEDGER_PAGE: i64 = 50;

#[derive(Debug, Clone)]
pub struct RedemptionOutcome {
    pub kind: TokenKind,
    pub new_balance: Option<i64>,
    pub ledger_entry: Option<PointLedgerEntry>,
    pub review_ticket: Option<ReviewTicket>,
}

#[derive(Debug, Clone)]
pub struct MemberSummary {
    pub member: Member,
    pub ledger: Vec<PointLedgerEntry>,
    pub review_tickets: Vec<ReviewTicket>,
}

impl Engine {
    pub async fn redeem(
        &self,
        member: &Member,
        token_value: &str,
        amount: Option<i64>,
    ) -> AppResult<RedemptionOutcome> {
        // Lectura sin bloqueo para rechazar pronto lo evidente
        let peek = self
            .store
            .token(token_value)
            .await?
            .ok_or(AppError::TokenNotFound)?;
        if peek.kind == TokenKind::Spend && !matches!(amount, Some(a) if a > 0) {
            return Err(AppError::AmountRequired);
        }

        let outcome = self
            .with_lock_retry("token", move || self.redeem_locked(member.id, token_value, amount))
            .await?;

        tracing::info!(
            member_id = %member.id,
            kind = outcome.kind.as_str(),
            new_balance = ?outcome.new_balance,
            "Token redeemed"
        );

        let text = match (outcome.kind, outcome.new_balance) {
            (TokenKind::Earn, Some(balance)) => {
                format!("¡Has sumado puntos! Tu saldo actual es de {} puntos.", balance)
            }
            (TokenKind::Spend, Some(balance)) => {
                format!("Has usado puntos. Tu saldo actual es de {} puntos.", balance)
            }
            _ => "Has recibido un ticket de reseña. ¡Gracias por tu visita!".to_string(),
        };
        self.notify_member(member.id, text);

        Ok(outcome)
    }

    async fn redeem_locked(
        &self,
        member_id: ObjectId,
        token_value: &str,
        amount: Option<i64>,
    ) -> AppResult<RedemptionOutcome> {
        let mut tx = self.store.begin().await?;
        match self.apply_redemption(tx.as_mut(), member_id, token_value, amount).await {
            Ok(Applied::Done(outcome)) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Ok(Applied::Expired) => {
                // la caducidad se guarda aunque el canje falle
                tx.commit().await?;
                Err(AppError::TokenExpired)
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort().await {
                    tracing::warn!(error = %abort_err, "Abort after failed redemption also failed");
                }
                Err(e)
            }
        }
    }

    async fn apply_redemption(
        &self,
        tx: &mut dyn StoreTx,
        member_id: ObjectId,
        token_value: &str,
        amount: Option<i64>,
    ) -> AppResult<Applied> {
        let mut token = tx
            .lock_token(token_value)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        let now = self.now().timestamp();
        match token.status {
            TokenStatus::Completed => return Err(AppError::TokenAlreadyUsed),
            TokenStatus::Expired => return Err(AppError::TokenExpired),
            TokenStatus::Pending => {}
        }
        if effective_status(&token, now) == TokenStatus::Expired {
            token.status = TokenStatus::Expired;
            tx.save_token(&token).await?;
            return Ok(Applied::Expired);
        }

        let mut member = tx
            .lock_member(member_id)
            .await?
            .ok_or(AppError::MemberNotRegistered)?;

        let mut outcome = RedemptionOutcome {
            kind: token.kind,
            new_balance: None,
            ledger_entry: None,
            review_ticket: None,
        };

        match token.kind {
            TokenKind::Earn => {
                let points = token.points_amount.filter(|p| *p > 0).ok_or_else(|| {
                    AppError::internal_trace(&format!("QR {} de sumar sin cantidad", token.id), None)
                })?;
                let balance = member.points_balance.checked_add(points).ok_or_else(|| {
                    AppError::validation_field("points_amount", "El saldo resultante es demasiado grande")
                })?;
                let entry = self
                    .move_points(tx, &mut member, &token, LedgerEntryType::Earn, points, balance, now)
                    .await?;
                outcome.new_balance = Some(balance);
                outcome.ledger_entry = Some(entry);
            }
            TokenKind::Spend => {
                let points = amount.filter(|a| *a > 0).ok_or(AppError::AmountRequired)?;
                if member.points_balance < points {
                    return Err(AppError::InsufficientBalance {
                        requested: points,
                        available: member.points_balance,
                    });
                }
                let balance = member.points_balance - points;
                let entry = self
                    .move_points(tx, &mut member, &token, LedgerEntryType::Spend, points, balance, now)
                    .await?;
                outcome.new_balance = Some(balance);
                outcome.ledger_entry = Some(entry);
            }
            TokenKind::ReviewTicket => {
                let ticket = ReviewTicket {
                    id: ObjectId::new(),
                    member_id: member.id,
                    source_token: token.id,
                    status: ReviewTicketStatus::Unused,
                    created_at: now,
                    used_at: None,
                };
                tx.insert_review_ticket(&ticket).await?;
                outcome.review_ticket = Some(ticket);
            }
        }

        token.status = TokenStatus::Completed;
        token.member_id = Some(member.id);
        token.completed_at = Some(now);
        tx.save_token(&token).await?;

        Ok(Applied::Done(outcome))
    }

    #[allow(clippy::too_many_arguments)]
    async fn move_points(
        &self,
        tx: &mut dyn StoreTx,
        member: &mut Member,
        token: &Token,
        entry_type: LedgerEntryType,
        points: i64,
        balance_after: i64,
        now: i64,
    ) -> AppResult<PointLedgerEntry> {
        let entry = PointLedgerEntry {
            id: ObjectId::new(),
            member_id: member.id,
            entry_type,
            points,
            balance_after,
            source_token: Some(token.id),
            created_at: now,
        };
        tx.set_points_balance(member.id, balance_after).await?;
        tx.append_ledger(&entry).await?;
        member.points_balance = balance_after;
        Ok(entry)
    }

    /// Marca un ticket de reseña como usado. Un segundo intento es conflicto.
    pub async fn use_review_ticket(&self, member: &Member, ticket_id: ObjectId) -> AppResult<ReviewTicket> {
        let now = self.now().timestamp();
        if let Some(ticket) = self.store.use_review_ticket(member.id, ticket_id, now).await? {
            tracing::info!(member_id = %member.id, ticket_id = %ticket_id, "Review ticket used");
            return Ok(ticket);
        }

        let tickets = self.store.review_tickets(member.id).await?;
        if tickets.iter().any(|t| t.id == ticket_id) {
            Err(AppError::Conflict("El ticket de reseña ya se ha usado".to_string()))
        } else {
            Err(AppError::not_found_id("Ticket de reseña", &ticket_id.to_hex()))
        }
    }

    pub async fn member_summary(&self, member_id: ObjectId) -> AppResult<MemberSummary> {
        let member = self
            .store
            .member(member_id)
            .await?
            .ok_or(AppError::MemberNotRegistered)?;
        let ledger = self.store.ledger(member_id, LEDGER_PAGE).await?;
        let review_tickets = self.store.review_tickets(member_id).await?;
        Ok(MemberSummary {
            member,
            ledger,
            review_tickets,
        })
    }
}

enum Applied {
    Done(RedemptionOutcome),
    Expired,
}
