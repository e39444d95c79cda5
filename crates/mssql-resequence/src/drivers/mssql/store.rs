//! SQL Server implementation of [`ResequenceStore`].

use async_trait::async_trait;
use bb8::PooledConnection;
use tiberius::ToSql;
use tracing::{debug, warn};

use super::pool::TiberiusConnectionManager;
use super::sql;
use crate::core::mapping::IdentifierMapping;
use crate::core::schema::{DependentReference, ParentLayout, TableRef};
use crate::core::traits::{ColumnRewrite, ResequenceStore};
use crate::error::{ResequenceError, Result};

/// Foreign key conflict (INSERT/UPDATE/DELETE or WITH CHECK revalidation).
const ERR_FOREIGN_KEY_CONFLICT: u32 = 547;

const TRANSACTION_ERRORS: &[u32] = &[
    1205, // deadlock victim
    266,  // transaction count mismatch
    3902, // COMMIT without BEGIN
    3903, // ROLLBACK without BEGIN
    3930, // transaction is doomed
];

const SCHEMA_ERRORS: &[u32] = &[
    544,  // explicit value for identity column with IDENTITY_INSERT OFF
    2601, // duplicate key in unique index
    2627, // unique or primary key violation
    245,  // conversion failed
    8114, // error converting data type
    8115, // arithmetic overflow
    207,  // invalid column name
    208,  // invalid object name
    515,  // cannot insert NULL
];

/// Map a driver error onto the resequencing error classes.
pub fn classify_error(err: tiberius::error::Error, table: Option<&TableRef>) -> ResequenceError {
    let server = match &err {
        tiberius::error::Error::Server(token) => Some((token.code(), token.message().to_string())),
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Routing { .. } => {
            return ResequenceError::Transaction(format!("connection lost: {}", err));
        }
        _ => None,
    };

    match server {
        Some((code, message)) => classify_server_error(code, message, table)
            .unwrap_or_else(|| ResequenceError::Database(err)),
        None => ResequenceError::Database(err),
    }
}

fn classify_server_error(
    code: u32,
    message: String,
    table: Option<&TableRef>,
) -> Option<ResequenceError> {
    let message = format!("{} (error {})", message, code);
    if code == ERR_FOREIGN_KEY_CONFLICT {
        let table = table.map(|t| t.to_string()).unwrap_or_default();
        Some(ResequenceError::constraint(table, message))
    } else if TRANSACTION_ERRORS.contains(&code) {
        Some(ResequenceError::Transaction(message))
    } else if SCHEMA_ERRORS.contains(&code) {
        Some(ResequenceError::Schema(message))
    } else {
        None
    }
}

/// One SQL Server session used for a whole resequencing operation.
///
/// The mapping and the captured parent rows are staged in session temp
/// tables, so every rewrite and the reinsert run as set-based statements.
pub struct MssqlStore {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
    target: String,
    explicit_ids: Option<TableRef>,
    staged: bool,
}

impl MssqlStore {
    pub(crate) fn new(
        conn: PooledConnection<'static, TiberiusConnectionManager>,
        target: String,
    ) -> Self {
        Self {
            conn,
            target,
            explicit_ids: None,
            staged: false,
        }
    }

    /// Single-column foreign keys referencing `table.id_column`.
    ///
    /// Multi-column foreign keys are skipped with a warning.
    pub async fn discover_dependents(
        &mut self,
        table: &TableRef,
        id_column: &str,
    ) -> Result<Vec<DependentReference>> {
        let qualified = table.qualified()?;
        let params: [&dyn ToSql; 2] = [&qualified, &id_column];
        let rows = self
            .conn
            .query(sql::DEPENDENT_FOREIGN_KEYS, &params)
            .await
            .map_err(|e| classify_error(e, Some(table)))?
            .into_first_result()
            .await
            .map_err(|e| classify_error(e, Some(table)))?;

        let mut dependents = Vec::new();
        for row in rows {
            let schema: &str = row.try_get(0)?.unwrap_or_default();
            let child: &str = row.try_get(1)?.unwrap_or_default();
            let column: &str = row.try_get(2)?.unwrap_or_default();
            let fk_name: &str = row.try_get(3)?.unwrap_or_default();
            let columns: i32 = row.try_get(4)?.unwrap_or(1);

            if columns > 1 {
                warn!(
                    "Skipping multi-column foreign key {} on {}.{} ({} columns)",
                    fk_name, schema, child, columns
                );
                continue;
            }
            dependents.push(DependentReference::new(TableRef::new(schema, child), column));
        }

        debug!(
            "Discovered {} dependents of {}.{}",
            dependents.len(),
            table,
            id_column
        );
        Ok(dependents)
    }

    /// Run a batch through `simple_query`.
    ///
    /// Session settings and temp tables only outlive the statement when they
    /// are issued this way; parameterized calls run inside `sp_executesql`.
    async fn batch(&mut self, statement: &str, table: Option<&TableRef>) -> Result<()> {
        self.conn
            .simple_query(statement)
            .await
            .map_err(|e| classify_error(e, table))?
            .into_results()
            .await
            .map_err(|e| classify_error(e, table))?;
        Ok(())
    }

    /// Single `COUNT_BIG`-style scalar from a session-scoped query.
    async fn scalar(&mut self, statement: &str, table: Option<&TableRef>) -> Result<i64> {
        let row = self
            .conn
            .simple_query(statement)
            .await
            .map_err(|e| classify_error(e, table))?
            .into_row()
            .await
            .map_err(|e| classify_error(e, table))?;
        Ok(row
            .map(|r| r.try_get::<i64, _>(0))
            .transpose()?
            .flatten()
            .unwrap_or(0))
    }

    async fn execute(
        &mut self,
        statement: &str,
        params: &[&dyn ToSql],
        table: Option<&TableRef>,
    ) -> Result<u64> {
        let result = self
            .conn
            .execute(statement, params)
            .await
            .map_err(|e| classify_error(e, table))?;
        Ok(result.total())
    }

    /// Ship the pairs from the client when nothing is staged yet, e.g. when a
    /// caller drives the store without [`ResequenceStore::stage_mapping`].
    async fn ensure_staged(&mut self, table: &TableRef, mapping: &IdentifierMapping) -> Result<()> {
        if self.staged {
            return Ok(());
        }
        self.batch(&sql::create_map_table(), None).await?;
        for statement in sql::insert_map_batches(mapping) {
            self.batch(&statement, None).await?;
        }
        self.staged = true;
        debug!("Sent {} identifier pairs for {}", mapping.len(), table);
        Ok(())
    }
}

#[async_trait]
impl ResequenceStore for MssqlStore {
    fn target(&self) -> String {
        self.target.clone()
    }

    async fn begin(&mut self) -> Result<()> {
        self.batch(sql::BEGIN, None).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.batch(sql::COMMIT, None).await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.batch(sql::ROLLBACK, None).await?;
        // Temp tables created inside the transaction are gone now.
        self.staged = false;
        Ok(())
    }

    async fn list_columns(&mut self, table: &TableRef) -> Result<Vec<String>> {
        let qualified = table.qualified()?;
        let params: [&dyn ToSql; 1] = [&qualified];
        let rows = self
            .conn
            .query(sql::LIST_COLUMNS, &params)
            .await
            .map_err(|e| classify_error(e, Some(table)))?
            .into_first_result()
            .await
            .map_err(|e| classify_error(e, Some(table)))?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(name) = row.try_get::<&str, _>(0)? {
                columns.push(name.to_string());
            }
        }
        Ok(columns)
    }

    async fn is_system_generated(&mut self, table: &TableRef, column: &str) -> Result<bool> {
        let qualified = table.qualified()?;
        let params: [&dyn ToSql; 2] = [&qualified, &column];
        let row = self
            .conn
            .query(sql::IS_IDENTITY, &params)
            .await
            .map_err(|e| classify_error(e, Some(table)))?
            .into_row()
            .await
            .map_err(|e| classify_error(e, Some(table)))?;

        match row.map(|r| r.try_get::<i32, _>(0)).transpose()?.flatten() {
            Some(flag) => Ok(flag == 1),
            None => Err(ResequenceError::Schema(format!(
                "identity metadata for {}.{} is unavailable",
                table, column
            ))),
        }
    }

    async fn read_identifiers(&mut self, table: &TableRef, id_column: &str) -> Result<Vec<i64>> {
        let statement = sql::read_identifiers(table, id_column)?;
        let rows = self
            .conn
            .query(statement.as_str(), &[])
            .await
            .map_err(|e| classify_error(e, Some(table)))?
            .into_first_result()
            .await
            .map_err(|e| classify_error(e, Some(table)))?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<i64, _>(0)? {
                Some(id) => ids.push(id),
                None => {
                    return Err(ResequenceError::Schema(format!(
                        "NULL identifier in {}.{}",
                        table, id_column
                    )))
                }
            }
        }
        Ok(ids)
    }

    async fn stage_mapping(
        &mut self,
        table: &TableRef,
        id_column: &str,
        mapping: &IdentifierMapping,
    ) -> Result<()> {
        self.batch(&sql::create_map_table(), None).await?;
        self.batch(&sql::fill_map_from_table(table, id_column)?, Some(table))
            .await?;

        let row = self
            .conn
            .simple_query(sql::map_summary())
            .await
            .map_err(|e| classify_error(e, Some(table)))?
            .into_row()
            .await
            .map_err(|e| classify_error(e, Some(table)))?;
        let (pairs, max_new) = match row {
            Some(r) => (
                r.try_get::<i64, _>(0)?.unwrap_or(0),
                r.try_get::<i64, _>(1)?.unwrap_or(0),
            ),
            None => (0, 0),
        };
        let expected = mapping.len() as i64;
        if pairs != expected || max_new != expected {
            return Err(ResequenceError::Schema(format!(
                "{} changed during resequencing: mapped {} rows, staged {}",
                table, expected, pairs
            )));
        }

        self.staged = true;
        debug!("Staged {} identifier pairs for {}", mapping.len(), table);
        Ok(())
    }

    async fn release_staging(&mut self) -> Result<()> {
        self.batch(&sql::drop_staging(), None).await?;
        self.staged = false;
        Ok(())
    }

    async fn suspend_constraints(&mut self, table: &TableRef) -> Result<()> {
        self.batch(&sql::suspend_constraints(table)?, Some(table)).await
    }

    async fn restore_constraints(&mut self, table: &TableRef) -> Result<()> {
        self.batch(&sql::restore_constraints(table)?, Some(table)).await
    }

    async fn rewrite_column(
        &mut self,
        table: &TableRef,
        column: &str,
        mapping: &IdentifierMapping,
    ) -> Result<ColumnRewrite> {
        self.ensure_staged(table, mapping).await?;
        let unmapped = self
            .scalar(&sql::count_unmapped(table, column)?, Some(table))
            .await?;
        let statement = sql::rewrite_column(table, column)?;
        let rewritten = self.execute(&statement, &[], Some(table)).await?;
        Ok(ColumnRewrite {
            rewritten,
            unmapped: unmapped as u64,
        })
    }

    async fn capture_rows(&mut self, table: &TableRef, layout: &ParentLayout) -> Result<u64> {
        self.batch(&sql::capture_rows(table, layout)?, Some(table)).await?;
        let count = self.scalar(&sql::count_captured(), Some(table)).await?;
        Ok(count as u64)
    }

    async fn delete_rows(&mut self, table: &TableRef) -> Result<u64> {
        let statement = sql::delete_rows(table)?;
        self.execute(&statement, &[], Some(table)).await
    }

    async fn insert_remapped(
        &mut self,
        table: &TableRef,
        layout: &ParentLayout,
        mapping: &IdentifierMapping,
    ) -> Result<u64> {
        self.ensure_staged(table, mapping).await?;
        let statement = sql::insert_remapped(table, layout)?;
        self.execute(&statement, &[], Some(table)).await
    }

    async fn reseed_identity(&mut self, table: &TableRef, value: i64) -> Result<()> {
        self.batch(&sql::reseed_identity(table, value)?, Some(table)).await
    }

    async fn set_explicit_ids(&mut self, table: &TableRef, enabled: bool) -> Result<()> {
        self.batch(&sql::set_identity_insert(table, enabled)?, Some(table))
            .await?;
        self.explicit_ids = if enabled { Some(table.clone()) } else { None };
        Ok(())
    }

    async fn clear_explicit_ids(&mut self) -> Result<()> {
        if let Some(table) = self.explicit_ids.clone() {
            self.set_explicit_ids(&table, false).await?;
        }
        Ok(())
    }

    fn explicit_ids_engaged(&self) -> Option<&TableRef> {
        self.explicit_ids.as_ref()
    }
}
