//! # Manejo de errores de la aplicación
//!
//! Un único `AppError` recorre todas las capas: el motor de reservas y puntos,
//! los repositorios y los handlers HTTP. Cada variante pertenece a una
//! [`ErrorCategory`] y tiene un código estable para que el cliente decida si
//! recargar huecos, pedir un QR nuevo o mostrar "puntos insuficientes".

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::error::Error;
use thiserror::Error;

/// Tipos de error de la aplicación con contexto
#[derive(Error, Debug)]
pub enum AppError {
    /// Error de base de datos con contexto adicional
    #[error("Error de base de datos en operación '{operation}': {source}")]
    Database {
        operation: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// Error de validación con campo específico
    #[error("Error de validación en campo '{field}': {message}")]
    ValidationWithField {
        field: String,
        message: String,
    },

    /// Error de validación general
    #[error("Error de validación: {0}")]
    Validation(String),

    /// Error de autorización simple
    #[error("No autorizado: {0}")]
    Unauthorized(String),

    /// Error de recurso no encontrado
    #[error("No encontrado: {resource_type} con ID '{id}'")]
    NotFoundWithId {
        resource_type: String,
        id: String,
    },

    /// Error de conflicto
    #[error("Conflicto: {0}")]
    Conflict(String),

    /// El hueco ya está ocupado o se perdió la carrera por él
    #[error("El horario solicitado ya no está disponible")]
    SlotUnavailable,

    /// El profesional no ofrece el servicio solicitado
    #[error("El profesional no ofrece este servicio")]
    CapabilityMismatch,

    /// Fecha u hora pasada
    #[error("Fecha inválida: {0}")]
    InvalidDate(String),

    /// Transición no permitida por el ciclo de vida de la reserva
    #[error("No se puede pasar de '{from}' a '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Código QR no encontrado")]
    TokenNotFound,

    #[error("El código QR ha caducado")]
    TokenExpired,

    #[error("El código QR ya fue utilizado")]
    TokenAlreadyUsed,

    /// Saldo de puntos insuficiente para el canje
    #[error("Puntos insuficientes: solicitados {requested}, disponibles {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    /// Un QR de canje necesita una cantidad de puntos positiva
    #[error("Se requiere una cantidad de puntos mayor que 0")]
    AmountRequired,

    #[error("El socio no está registrado")]
    MemberNotRegistered,

    /// Otra transacción tiene el mismo bloqueo; transitorio
    #[error("Recurso bloqueado por otra operación: {scope}")]
    LockContention { scope: String },

    /// Error interno con código de rastreo
    #[error("Error interno (trace: {trace_id}): {message}")]
    InternalWithTrace {
        trace_id: String,
        message: String,
    },

    /// Error interno simple
    #[error("Error interno: {0}")]
    Internal(String),
}

/// Taxonomía de errores expuesta a los clientes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Entrada mal formada, rechazada antes de abrir ninguna transacción
    Validation,
    /// Carrera perdida por un hueco o un QR; se puede reintentar con datos frescos
    Conflict,
    /// Ventana de validez superada; hay que generar un QR nuevo
    Expired,
    /// Corregible por el usuario (saldo, servicio no ofrecido...)
    Domain,
    Auth,
    NotFound,
    /// Bloqueo o almacenamiento no disponible; reintentar con espera
    Infrastructure,
}

// Métodos helper para crear errores con contexto
impl AppError {
    /// Crea un error de base de datos con contexto de operación
    pub fn database(operation: &str, source: mongodb::error::Error) -> Self {
        Self::Database {
            operation: operation.to_string(),
            source,
        }
    }

    /// Crea un error de validación con campo específico
    pub fn validation_field(field: &str, message: &str) -> Self {
        Self::ValidationWithField {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// Crea un error de no encontrado con ID
    pub fn not_found_id(resource_type: &str, id: &str) -> Self {
        Self::NotFoundWithId {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Crea un error interno con trace ID
    pub fn internal_trace(message: &str, trace_id: Option<String>) -> Self {
        Self::InternalWithTrace {
            trace_id: trace_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            message: message.to_string(),
        }
    }

    pub fn lock_contention(scope: impl Into<String>) -> Self {
        Self::LockContention {
            scope: scope.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_)
            | Self::ValidationWithField { .. }
            | Self::AmountRequired
            | Self::InvalidDate(_) => ErrorCategory::Validation,
            Self::SlotUnavailable
            | Self::TokenAlreadyUsed
            | Self::InvalidTransition { .. }
            | Self::Conflict(_) => ErrorCategory::Conflict,
            Self::TokenExpired => ErrorCategory::Expired,
            Self::CapabilityMismatch | Self::InsufficientBalance { .. } => ErrorCategory::Domain,
            Self::Unauthorized(_) | Self::MemberNotRegistered => ErrorCategory::Auth,
            Self::NotFoundWithId { .. } | Self::TokenNotFound => ErrorCategory::NotFound,
            Self::LockContention { .. }
            | Self::Database { .. }
            | Self::InternalWithTrace { .. }
            | Self::Internal(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Código estable que acompaña a cada respuesta de error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database { .. } => "database",
            Self::ValidationWithField { .. } | Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFoundWithId { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::SlotUnavailable => "slot_unavailable",
            Self::CapabilityMismatch => "capability_mismatch",
            Self::InvalidDate(_) => "invalid_date",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::TokenNotFound => "token_not_found",
            Self::TokenExpired => "token_expired",
            Self::TokenAlreadyUsed => "token_already_used",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::AmountRequired => "amount_required",
            Self::MemberNotRegistered => "member_not_registered",
            Self::LockContention { .. } => "lock_timeout",
            Self::InternalWithTrace { .. } | Self::Internal(_) => "internal",
        }
    }

    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::ValidationWithField { .. }
            | Self::AmountRequired
            | Self::InvalidDate(_)
            | Self::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::MemberNotRegistered => StatusCode::FORBIDDEN,
            Self::NotFoundWithId { .. } | Self::TokenNotFound => StatusCode::NOT_FOUND,
            Self::SlotUnavailable
            | Self::TokenAlreadyUsed
            | Self::InvalidTransition { .. }
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TokenExpired => StatusCode::GONE,
            Self::CapabilityMismatch => StatusCode::UNPROCESSABLE_ENTITY,
            Self::LockContention { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database { .. } | Self::InternalWithTrace { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Log detallado del error antes de responder
        let message = match self {
            Self::Database { operation, source } => {
                tracing::error!(
                    operation = %operation,
                    error = %source,
                    error_chain = ?source.source(),
                    "Database error occurred"
                );
                "Error interno del servidor".to_string()
            }
            Self::ValidationWithField { field, message } => {
                tracing::warn!(field = %field, message = %message, "Validation error");
                format!("Campo '{}': {}", field, message)
            }
            Self::NotFoundWithId { resource_type, id } => {
                tracing::info!(resource_type = %resource_type, id = %id, "Resource not found");
                format!("{} con ID '{}' no encontrado", resource_type, id)
            }
            Self::InternalWithTrace { trace_id, message } => {
                tracing::error!(trace_id = %trace_id, message = %message, "Internal error with trace");
                format!("Error interno (trace: {})", trace_id)
            }
            Self::LockContention { scope } => {
                tracing::warn!(scope = %scope, "Lock wait timed out");
                self.to_string()
            }
            error => {
                match error.category() {
                    ErrorCategory::Infrastructure => tracing::error!(
                        error = %error,
                        error_chain = ?error.source(),
                        "General error"
                    ),
                    category => tracing::info!(
                        error = %error,
                        category = ?category,
                        "Request rejected"
                    ),
                }
                error.to_string()
            }
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.category().label().to_string(),
            message,
            code: self.code().to_string(),
        })
    }
}

impl ErrorCategory {
    fn label(self) -> &'static str {
        match self {
            Self::Validation => "Error de validación",
            Self::Conflict => "Conflicto",
            Self::Expired => "Caducado",
            Self::Domain => "Operación no permitida",
            Self::Auth => "No autorizado",
            Self::NotFound => "No encontrado",
            Self::Infrastructure => "Error interno",
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
}

pub type AppResult<T> = Result<T, AppError>;

pub trait ResultExt<T> {
    fn map_err_validation(self, message: &str) -> AppResult<T>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + 'static,
{
    fn map_err_validation(self, message: &str) -> AppResult<T> {
        self.map_err(|e| AppError::Validation(format!("{}: {}", message, e)))
    }
}
