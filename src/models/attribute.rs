//! # Attribute Model
//!
//! Typed key/value facts attached to a process (and, through it, to a
//! process graph): environment variables, input/output markers and error
//! markers.
//!
//! ## State Mirroring
//!
//! Every attribute carries a copy of its owning process's state. The copy is
//! rewritten by the process store inside the same transaction as every
//! process state change, so retention can select attributes by state without
//! joining `colonies_processes`.
//!
//! ## Database Schema
//!
//! Maps to `colonies_attributes`:
//! ```sql
//! CREATE TABLE colonies_attributes (
//!   attribute_id TEXT PRIMARY KEY,
//!   target_id TEXT NOT NULL,
//!   target_colony_name TEXT NOT NULL,
//!   target_process_graph_id TEXT NOT NULL DEFAULT '',
//!   attribute_type INTEGER NOT NULL,
//!   key TEXT NOT NULL,
//!   value TEXT NOT NULL,
//!   state INTEGER NOT NULL,
//!   added TIMESTAMPTZ NOT NULL
//! );
//! ```

use crate::error::{ColoniesError, ColoniesResult};
use crate::models::generate_id;
use crate::state_machine::{AttributeType, ProcessState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

const ATTRIBUTE_COLUMNS: &str = "attribute_id, target_id, target_colony_name, \
    target_process_graph_id, attribute_type, key, value, state, added";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Attribute {
    pub attribute_id: String,
    /// Owning process ID
    pub target_id: String,
    pub target_colony_name: String,
    /// Owning process graph ID, empty if the process is stand-alone
    pub target_process_graph_id: String,
    pub attribute_type: AttributeType,
    pub key: String,
    pub value: String,
    /// Mirror of the owning process's state
    pub state: ProcessState,
    pub added: DateTime<Utc>,
}

/// New Attribute for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttribute {
    pub target_id: String,
    pub target_colony_name: String,
    pub target_process_graph_id: String,
    pub attribute_type: AttributeType,
    pub key: String,
    pub value: String,
    pub state: ProcessState,
}

impl NewAttribute {
    pub fn new(
        target_id: impl Into<String>,
        target_colony_name: impl Into<String>,
        target_process_graph_id: impl Into<String>,
        attribute_type: AttributeType,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            target_colony_name: target_colony_name.into(),
            target_process_graph_id: target_process_graph_id.into(),
            attribute_type,
            key: key.into(),
            value: value.into(),
            state: ProcessState::Waiting,
        }
    }
}

impl Attribute {
    /// Create a new attribute
    pub async fn create(pool: &PgPool, new_attribute: NewAttribute) -> Result<Attribute, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let attribute = Self::create_with_transaction(&mut tx, new_attribute).await?;
        tx.commit().await?;
        Ok(attribute)
    }

    /// Create a new attribute inside an open transaction
    pub async fn create_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        new_attribute: NewAttribute,
    ) -> Result<Attribute, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO colonies_attributes (
                attribute_id, target_id, target_colony_name, target_process_graph_id,
                attribute_type, key, value, state, added
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING {ATTRIBUTE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Attribute>(&sql)
            .bind(generate_id())
            .bind(&new_attribute.target_id)
            .bind(&new_attribute.target_colony_name)
            .bind(&new_attribute.target_process_graph_id)
            .bind(new_attribute.attribute_type)
            .bind(&new_attribute.key)
            .bind(&new_attribute.value)
            .bind(new_attribute.state)
            .fetch_one(&mut **tx)
            .await
    }

    /// Insert attributes one by one, stopping at the first failure.
    ///
    /// Rows inserted before the failure stay in place; the caller has to treat
    /// a failed batch as partially applied.
    pub async fn create_batch(
        pool: &PgPool,
        new_attributes: Vec<NewAttribute>,
    ) -> Result<Vec<Attribute>, sqlx::Error> {
        let mut created = Vec::with_capacity(new_attributes.len());
        for new_attribute in new_attributes {
            created.push(Self::create(pool, new_attribute).await?);
        }
        Ok(created)
    }

    /// Find an attribute by ID
    pub async fn find_by_id(pool: &PgPool, attribute_id: &str) -> ColoniesResult<Option<Attribute>> {
        let sql = format!("SELECT {ATTRIBUTE_COLUMNS} FROM colonies_attributes WHERE attribute_id = $1");
        let rows = sqlx::query_as::<_, Attribute>(&sql)
            .bind(attribute_id)
            .fetch_all(pool)
            .await?;

        Self::expect_unique(rows, attribute_id.to_string())
    }

    /// Find the attribute of a process with a given key and type
    pub async fn find_by_key(
        pool: &PgPool,
        target_id: &str,
        key: &str,
        attribute_type: AttributeType,
    ) -> ColoniesResult<Option<Attribute>> {
        let sql = format!(
            r#"
            SELECT {ATTRIBUTE_COLUMNS} FROM colonies_attributes
            WHERE target_id = $1 AND key = $2 AND attribute_type = $3
            "#
        );
        let rows = sqlx::query_as::<_, Attribute>(&sql)
            .bind(target_id)
            .bind(key)
            .bind(attribute_type)
            .fetch_all(pool)
            .await?;

        Self::expect_unique(rows, format!("{target_id}/{key}/{attribute_type}"))
    }

    fn expect_unique(mut rows: Vec<Attribute>, key: String) -> ColoniesResult<Option<Attribute>> {
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            count => Err(ColoniesError::Integrity {
                entity: "attribute",
                key,
                count,
            }),
        }
    }

    /// All attributes owned by a process
    pub async fn find_by_target(pool: &PgPool, target_id: &str) -> Result<Vec<Attribute>, sqlx::Error> {
        let sql = format!(
            "SELECT {ATTRIBUTE_COLUMNS} FROM colonies_attributes WHERE target_id = $1 ORDER BY added, key"
        );
        sqlx::query_as::<_, Attribute>(&sql)
            .bind(target_id)
            .fetch_all(pool)
            .await
    }

    /// Attributes of one type owned by a process
    pub async fn find_by_target_and_type(
        pool: &PgPool,
        target_id: &str,
        attribute_type: AttributeType,
    ) -> Result<Vec<Attribute>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {ATTRIBUTE_COLUMNS} FROM colonies_attributes
            WHERE target_id = $1 AND attribute_type = $2
            ORDER BY added, key
            "#
        );
        sqlx::query_as::<_, Attribute>(&sql)
            .bind(target_id)
            .bind(attribute_type)
            .fetch_all(pool)
            .await
    }

    /// Attributes of one type across many processes, used to rebuild env maps
    pub async fn find_by_targets_and_type(
        pool: &PgPool,
        target_ids: &[String],
        attribute_type: AttributeType,
    ) -> Result<Vec<Attribute>, sqlx::Error> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {ATTRIBUTE_COLUMNS} FROM colonies_attributes
            WHERE target_id = ANY($1) AND attribute_type = $2
            ORDER BY target_id, key
            "#
        );
        sqlx::query_as::<_, Attribute>(&sql)
            .bind(target_ids)
            .bind(attribute_type)
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_colony(pool: &PgPool, colony_name: &str) -> Result<Vec<Attribute>, sqlx::Error> {
        let sql = format!(
            "SELECT {ATTRIBUTE_COLUMNS} FROM colonies_attributes WHERE target_colony_name = $1 ORDER BY added"
        );
        sqlx::query_as::<_, Attribute>(&sql)
            .bind(colony_name)
            .fetch_all(pool)
            .await
    }

    /// Rewrite the value of an existing attribute
    pub async fn update_value(&mut self, pool: &PgPool, value: &str) -> ColoniesResult<()> {
        let result = sqlx::query("UPDATE colonies_attributes SET value = $2 WHERE attribute_id = $1")
            .bind(&self.attribute_id)
            .bind(value)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ColoniesError::not_found("attribute", &self.attribute_id));
        }

        self.value = value.to_string();
        Ok(())
    }

    /// Mirror a process state onto all of its attributes
    pub async fn set_state(
        pool: &PgPool,
        target_id: &str,
        state: ProcessState,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let updated = Self::set_state_with_transaction(&mut tx, target_id, state).await?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn set_state_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        target_id: &str,
        state: ProcessState,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE colonies_attributes SET state = $2 WHERE target_id = $1")
            .bind(target_id)
            .bind(state)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    // ============================================================================
    // DELETION
    // ============================================================================

    pub async fn delete_by_id(pool: &PgPool, attribute_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM colonies_attributes WHERE attribute_id = $1")
            .bind(attribute_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_by_target(pool: &PgPool, target_id: &str) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let deleted = Self::delete_by_target_with_transaction(&mut tx, target_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn delete_by_target_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        target_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM colonies_attributes WHERE target_id = $1")
            .bind(target_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_target_and_type(
        pool: &PgPool,
        target_id: &str,
        attribute_type: AttributeType,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM colonies_attributes WHERE target_id = $1 AND attribute_type = $2",
        )
        .bind(target_id)
        .bind(attribute_type)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete every attribute belonging to processes of one graph
    pub async fn delete_by_process_graph_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        process_graph_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM colonies_attributes WHERE target_process_graph_id = $1")
                .bind(process_graph_id)
                .execute(&mut **tx)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_by_colony(pool: &PgPool, colony_name: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM colonies_attributes WHERE target_colony_name = $1")
            .bind(colony_name)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete attributes of stand-alone processes in a colony by mirrored state
    pub async fn delete_all_by_colony_with_state(
        pool: &PgPool,
        colony_name: &str,
        state: ProcessState,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM colonies_attributes
            WHERE target_colony_name = $1 AND target_process_graph_id = '' AND state = $2
            "#,
        )
        .bind(colony_name)
        .bind(state)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete attributes of in-graph processes in a colony, optionally by mirrored state
    pub async fn delete_all_in_process_graphs_by_colony_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        colony_name: &str,
        state: Option<ProcessState>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM colonies_attributes
            WHERE target_colony_name = $1
              AND target_process_graph_id <> ''
              AND ($2::INTEGER IS NULL OR state = $2)
            "#,
        )
        .bind(colony_name)
        .bind(state)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete attributes whose mirrored state is SUCCESS and that were added before the cutoff
    pub async fn delete_successful_older_than(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM colonies_attributes WHERE state = $1 AND added < $2")
                .bind(ProcessState::Success)
                .bind(cutoff)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM colonies_attributes")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM colonies_attributes")
            .fetch_one(pool)
            .await
    }
}
