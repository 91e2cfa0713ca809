//! # Autenticación por token Bearer
//!
//! Operadores (personal de tienda) y socios presentan su `access_token` en
//! `Authorization: Bearer <token>`. Un socio desconocido no es un error de
//! credenciales sino de alta: responde `member_not_registered`.

use actix_web::HttpRequest;

use super::{AppError, AppResult};
use crate::db::models::{Member, Operator};
use crate::engine::Engine;

/// Extrae el token Bearer del header Authorization
///
/// # Errores
/// - `Unauthorized`: Si falta el header, es inválido o no tiene el formato correcto
pub fn extract_token(req: &HttpRequest) -> AppResult<String> {
    let auth_header = req
        .headers()
        .get("authorization")
        .ok_or_else(|| AppError::Unauthorized("Falta header Authorization".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Header Authorization inválido".to_string()))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(AppError::Unauthorized("Formato de token inválido".to_string())),
    }
}

pub async fn authenticate_operator(engine: &Engine, req: &HttpRequest) -> AppResult<Operator> {
    let token = extract_token(req)?;
    engine
        .store()
        .operator_by_token(&token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Token inválido".to_string()))
}

pub async fn authenticate_member(engine: &Engine, req: &HttpRequest) -> AppResult<Member> {
    let token = extract_token(req)?;
    engine
        .store()
        .member_by_token(&token)
        .await?
        .ok_or(AppError::MemberNotRegistered)
}
