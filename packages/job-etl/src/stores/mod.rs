//! Repository implementations.
//!
//! Available backends:
//! - `MemoryRepository` - In-memory staging/live store (always available)
//! - `PostgresRepository` - PostgreSQL staging and live databases (requires `postgres` feature)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryRepository;

#[cfg(feature = "postgres")]
pub use postgres::PostgresRepository;
