//! Emisión y consulta de QR de un solo uso.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use mongodb::bson::oid::ObjectId;
use rand::RngCore;

use super::Engine;
use crate::api::{AppError, AppResult};
use crate::db::models::{Operator, Token, TokenKind, TokenStatus};

/// 32 bytes aleatorios en base64 url-safe (43 caracteres)
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Estado visible del QR: un `pending` vencido cuenta como `expired`
/// aunque todavía no se haya guardado así.
pub fn effective_status(token: &Token, now: i64) -> TokenStatus {
    match token.status {
        TokenStatus::Pending if token.expires_at <= now => TokenStatus::Expired,
        status => status,
    }
}

impl Engine {
    pub async fn issue_token(
        &self,
        operator: &Operator,
        kind: TokenKind,
        points_amount: Option<i64>,
    ) -> AppResult<Token> {
        let points_amount = match kind {
            TokenKind::Earn => match points_amount {
                Some(points) if points > 0 => Some(points),
                _ => {
                    return Err(AppError::validation_field(
                        "points_amount",
                        "Un QR para sumar puntos necesita una cantidad positiva",
                    ))
                }
            },
            TokenKind::Spend | TokenKind::ReviewTicket => None,
        };

        let now = self.now();
        let token = Token {
            id: ObjectId::new(),
            kind,
            token: generate_token_value(),
            points_amount,
            status: TokenStatus::Pending,
            member_id: None,
            expires_at: (now + self.settings.token_ttl).timestamp(),
            issued_by: operator.id,
            created_at: now.timestamp(),
            completed_at: None,
        };
        self.store.insert_token(&token).await?;

        tracing::info!(
            token_id = %token.id,
            kind = kind.as_str(),
            operator_id = %operator.id,
            expires_at = token.expires_at,
            "Issued QR token"
        );
        Ok(token)
    }

    /// Consulta para la pantalla del operador. Si el QR ha vencido se deja
    /// guardado como `expired`.
    pub async fn token_status(&self, value: &str) -> AppResult<Token> {
        let mut token = self
            .store
            .token(value)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        let now = self.now().timestamp();
        if token.status == TokenStatus::Pending && effective_status(&token, now) == TokenStatus::Expired {
            if self.store.expire_token(token.id).await? {
                tracing::debug!(token_id = %token.id, "Token marked as expired on read");
                token.status = TokenStatus::Expired;
            } else {
                // canjeado entre la lectura y la escritura
                token = self
                    .store
                    .token(value)
                    .await?
                    .ok_or(AppError::TokenNotFound)?;
            }
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{harness, salon};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn token_values_are_url_safe_and_distinct() {
        let a = generate_token_value();
        let b = generate_token_value();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn earn_token_requires_positive_points() {
        let h = harness();
        let s = salon(&h);

        for bad in [None, Some(0), Some(-5)] {
            let err = assert_err!(h.engine.issue_token(&s.operator, TokenKind::Earn, bad).await);
            assert!(matches!(err, AppError::ValidationWithField { ref field, .. } if field == "points_amount"));
        }

        let token = assert_ok!(h.engine.issue_token(&s.operator, TokenKind::Earn, Some(50)).await);
        assert_eq!(token.points_amount, Some(50));
        assert_eq!(token.status, TokenStatus::Pending);
        assert_eq!(token.issued_by, s.operator.id);
        assert_eq!(token.expires_at - token.created_at, 5 * 60);
    }

    #[tokio::test]
    async fn spend_and_review_tokens_carry_no_amount() {
        let h = harness();
        let s = salon(&h);
        let spend = assert_ok!(h.engine.issue_token(&s.operator, TokenKind::Spend, Some(30)).await);
        assert_eq!(spend.points_amount, None);
        let review = assert_ok!(h.engine.issue_token(&s.operator, TokenKind::ReviewTicket, None).await);
        assert_eq!(review.kind, TokenKind::ReviewTicket);
    }

    #[tokio::test]
    async fn reading_an_overdue_token_expires_it() {
        let h = harness();
        let s = salon(&h);
        let token = assert_ok!(h.engine.issue_token(&s.operator, TokenKind::Spend, None).await);

        let fresh = assert_ok!(h.engine.token_status(&token.token).await);
        assert_eq!(fresh.status, TokenStatus::Pending);

        h.clock.advance(chrono::Duration::minutes(5));
        let read = assert_ok!(h.engine.token_status(&token.token).await);
        assert_eq!(read.status, TokenStatus::Expired);
        assert_eq!(h.store.token_by_id(token.id).unwrap().status, TokenStatus::Expired);
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let h = harness();
        let err = assert_err!(h.engine.token_status("no-existe").await);
        assert!(matches!(err, AppError::TokenNotFound));
    }

    #[test]
    fn terminal_statuses_are_kept() {
        let token = Token {
            id: ObjectId::new(),
            kind: TokenKind::Earn,
            token: "x".into(),
            points_amount: Some(1),
            status: TokenStatus::Completed,
            member_id: None,
            expires_at: 0,
            issued_by: ObjectId::new(),
            created_at: 0,
            completed_at: Some(0),
        };
        assert_eq!(effective_status(&token, 100), TokenStatus::Completed);
    }
}
