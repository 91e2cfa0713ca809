//! # Utilidades de logging para errores
//!
//! Recorren la cadena `source()` de un error (los de MongoDB suelen traer
//! varias capas) y la dejan en un único evento de tracing.

use std::error::Error as StdError;

fn error_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);

    while let Some(err) = current {
        chain.push(err.to_string());
        current = err.source();
    }
    chain
}

/// Registra la cadena completa de errores
///
/// # Ejemplo
/// ```rust,ignore
/// if let Err(e) = repo.create_indexes().await {
///     log_error_chain(&e, Some("creating indexes"));
/// }
/// ```
pub fn log_error_chain<E>(error: &E, context: Option<&str>)
where
    E: StdError + 'static,
{
    let error_chain = error_chain(error);

    if let Some(ctx) = context {
        tracing::error!(
            context = %ctx,
            error_chain = ?error_chain,
            "Error with full chain (with context)"
        );
    } else {
        tracing::error!(error_chain = ?error_chain, "Error with full chain");
    }
}

/// Extension trait para Results que añade logging automático de error chains
///
/// ```rust,ignore
/// session
///     .abort_transaction()
///     .await
///     .log_error_level(tracing::Level::WARN)?;
/// ```
pub trait ErrorLogExt<T, E> {
    /// Loggea la cadena de errores con contexto adicional
    fn log_error_context(self, context: &str) -> Result<T, E>;

    /// Loggea la cadena de errores con un nivel específico
    fn log_error_level(self, level: tracing::Level) -> Result<T, E>;
}

impl<T, E> ErrorLogExt<T, E> for Result<T, E>
where
    E: StdError + 'static,
{
    fn log_error_context(self, context: &str) -> Result<T, E> {
        if let Err(ref error) = self {
            log_error_chain(error, Some(context));
        }
        self
    }

    fn log_error_level(self, level: tracing::Level) -> Result<T, E> {
        if let Err(ref error) = self {
            match level {
                tracing::Level::ERROR => log_error_chain(error, None),
                tracing::Level::WARN => {
                    tracing::warn!(error_chain = ?error_chain(error), "Warning with error chain");
                }
                _ => {
                    tracing::info!("Error occurred: {}", error);
                }
            }
        }
        self
    }
}
