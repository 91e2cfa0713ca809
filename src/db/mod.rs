//! # Persistencia
//!
//! - [`models`] - documentos de MongoDB
//! - [`store`] - contratos que usa el motor
//! - [`mongodb`] - implementación sobre MongoDB con transacciones
//! - `memory` - implementación en memoria para los tests

pub mod models;
pub mod mongodb;
pub mod store;

#[cfg(test)]
pub mod memory;

pub use mongodb::MongoRepo;
