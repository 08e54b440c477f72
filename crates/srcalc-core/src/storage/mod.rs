//! # Storage Module
//!
//! Persistent catalog storage using redb.
//!
//! Uses redb embedded database for:
//! - ACID transactions (a catalog import is all-or-nothing)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (the HTTP server reads while an administrator writes)
//!
//! Records are postcard-encoded.

mod catalog_store;

pub use catalog_store::CatalogStore;

use crate::catalog::{CatalogError, FieldError};
use thiserror::Error;

/// Errors from the catalog store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("record encoding error: {0}")]
    Codec(#[from] postcard::Error),

    #[error(transparent)]
    InvalidCatalog(#[from] CatalogError),

    #[error("invalid variable: {} field error(s)", .0.len())]
    InvalidVariable(Vec<FieldError>),

    #[error("a variable with key '{0}' already exists")]
    DuplicateVariableKey(String),

    #[error("variable not found: {0}")]
    VariableNotFound(String),
}
