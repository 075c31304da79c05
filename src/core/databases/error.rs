//! Database errors.
//!
//! This module contains the [Database errors](crate::core::databases::error::Error).
use std::panic::Location;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The query unexpectedly returned nothing.
    #[error("The query unexpectedly returned nothing: {source}")]
    QueryReturnedNoRows { source: Arc<r2d2_sqlite::rusqlite::Error> },

    /// The query was malformed or failed mid-flight.
    #[error("The query failed: {source}")]
    InvalidQuery { source: Arc<r2d2_sqlite::rusqlite::Error> },

    /// Unable to insert a record into the database.
    #[error("Unable to insert record into database, {location}")]
    InsertFailed { location: &'static Location<'static> },

    /// A unique constraint rejected the record.
    #[error("Record already exists: {message}")]
    RecordAlreadyExists { message: String },

    /// The record to mutate is missing.
    #[error("Record not found: {message}")]
    RecordNotFound { message: String },

    /// Unable to create a connection pool.
    #[error("Failed to create r2d2 connection pool: {source}")]
    ConnectionPool { source: Arc<r2d2::Error> },
}

impl From<r2d2_sqlite::rusqlite::Error> for Error {
    fn from(err: r2d2_sqlite::rusqlite::Error) -> Self {
        match err {
            r2d2_sqlite::rusqlite::Error::QueryReturnedNoRows => Error::QueryReturnedNoRows { source: Arc::new(err) },
            _ => Error::InvalidQuery { source: Arc::new(err) },
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Self::ConnectionPool { source: Arc::new(err) }
    }
}
