//! # Database Operations
//!
//! Connection pooling and schema migrations for the PostgreSQL-backed stores.
//!
//! - [`connection`]: pool construction from [`crate::config::DatabaseConfig`]
//! - [`migrator`]: embedded schema migrations
//!
//! ```rust,no_run
//! use colonies_core::config::CoreConfig;
//! use colonies_core::database::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::load()?;
//! let db = DatabaseConnection::new(&config.database).await?;
//! assert!(db.health_check().await?);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrator;

pub use connection::{connect, server_now, DatabaseConnection};
pub use migrator::{DatabaseMigrations, MIGRATOR};
