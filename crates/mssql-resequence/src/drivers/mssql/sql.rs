//! T-SQL statement builders.
//!
//! Every identifier goes through [`quote_mssql`] / [`TableRef::qualified`];
//! only integer identifiers are ever inlined as values.

use crate::core::identifier::{quote_literal, quote_mssql};
use crate::core::mapping::IdentifierMapping;
use crate::core::schema::{ParentLayout, TableRef};
use crate::error::Result;

/// Session temp table holding the old → new identifier pairs.
pub const MAP_TABLE: &str = "#resequence_map";

/// Session temp table holding the captured parent rows.
pub const ROWS_TABLE: &str = "#resequence_rows";

/// SQL Server accepts at most 1000 row constructors per VALUES clause.
pub const MAX_VALUES_ROWS: usize = 1000;

/// `XACT_ABORT` is on only while the transaction is open; pooled sessions go
/// back with the connection default.
pub const BEGIN: &str = "SET XACT_ABORT ON; BEGIN TRANSACTION";
pub const COMMIT: &str = "COMMIT TRANSACTION; SET XACT_ABORT OFF";
pub const ROLLBACK: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; SET XACT_ABORT OFF";

pub const LIST_COLUMNS: &str = r#"
    SELECT c.name
    FROM sys.columns c
    JOIN sys.types t ON t.user_type_id = c.user_type_id
    WHERE c.object_id = OBJECT_ID(@P1)
      AND c.is_computed = 0
      AND t.name NOT IN ('timestamp', 'rowversion')
    ORDER BY c.column_id
"#;

pub const IS_IDENTITY: &str = "SELECT COLUMNPROPERTY(OBJECT_ID(@P1), @P2, 'IsIdentity')";

pub const DEPENDENT_FOREIGN_KEYS: &str = r#"
    SELECT
        SCHEMA_NAME(child.schema_id),
        child.name,
        pc.name,
        fk.name,
        (SELECT COUNT(*) FROM sys.foreign_key_columns x
         WHERE x.constraint_object_id = fk.object_id)
    FROM sys.foreign_keys fk
    JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
    JOIN sys.tables child ON child.object_id = fkc.parent_object_id
    JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id
        AND pc.column_id = fkc.parent_column_id
    JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id
        AND rc.column_id = fkc.referenced_column_id
    WHERE fkc.referenced_object_id = OBJECT_ID(@P1)
      AND rc.name = @P2
    ORDER BY SCHEMA_NAME(child.schema_id), child.name, pc.name
"#;

/// Ascending identifiers, duplicates included.
pub fn read_identifiers(table: &TableRef, id_column: &str) -> Result<String> {
    let id = quote_mssql(id_column)?;
    Ok(format!(
        "SELECT CAST({id} AS BIGINT) FROM {} ORDER BY {id}",
        table.qualified()?
    ))
}

pub fn create_map_table() -> String {
    format!(
        "{}; CREATE TABLE {MAP_TABLE} (old_id BIGINT NOT NULL PRIMARY KEY, new_id BIGINT NOT NULL)",
        drop_if_exists(MAP_TABLE)
    )
}

/// Fill [`MAP_TABLE`] from the table itself: the n-th smallest identifier maps to n.
pub fn fill_map_from_table(table: &TableRef, id_column: &str) -> Result<String> {
    let id = quote_mssql(id_column)?;
    Ok(format!(
        "INSERT INTO {MAP_TABLE} (old_id, new_id) SELECT CAST({id} AS BIGINT), ROW_NUMBER() OVER (ORDER BY {id}) FROM {}",
        table.qualified()?
    ))
}

/// Pair count and largest new identifier in [`MAP_TABLE`].
pub fn map_summary() -> String {
    format!("SELECT COUNT_BIG(*), ISNULL(MAX(new_id), 0) FROM {MAP_TABLE}")
}

/// `INSERT ... VALUES` batches of at most [`MAX_VALUES_ROWS`] pairs.
pub fn insert_map_batches(mapping: &IdentifierMapping) -> Vec<String> {
    let pairs: Vec<(i64, i64)> = mapping.iter().collect();
    pairs
        .chunks(MAX_VALUES_ROWS)
        .map(|chunk| {
            let values = chunk
                .iter()
                .map(|(old, new)| format!("({}, {})", old, new))
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO {MAP_TABLE} (old_id, new_id) VALUES {}", values)
        })
        .collect()
}

pub fn drop_staging() -> String {
    format!("{}; {}", drop_if_exists(MAP_TABLE), drop_if_exists(ROWS_TABLE))
}

fn drop_if_exists(temp_table: &str) -> String {
    format!(
        "IF OBJECT_ID('tempdb..{0}') IS NOT NULL DROP TABLE {0}",
        temp_table
    )
}

pub fn suspend_constraints(table: &TableRef) -> Result<String> {
    Ok(format!("ALTER TABLE {} NOCHECK CONSTRAINT ALL", table.qualified()?))
}

pub fn restore_constraints(table: &TableRef) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} WITH CHECK CHECK CONSTRAINT ALL",
        table.qualified()?
    ))
}

/// Rewrite mapped values of `column`; NULLs and unmapped values never join.
pub fn rewrite_column(table: &TableRef, column: &str) -> Result<String> {
    let col = quote_mssql(column)?;
    Ok(format!(
        "UPDATE d SET d.{col} = m.new_id FROM {} AS d INNER JOIN {MAP_TABLE} AS m ON d.{col} = m.old_id",
        table.qualified()?
    ))
}

/// Non-NULL values of `column` with no entry in [`MAP_TABLE`].
pub fn count_unmapped(table: &TableRef, column: &str) -> Result<String> {
    let col = quote_mssql(column)?;
    Ok(format!(
        "SELECT COUNT_BIG(*) FROM {} AS d LEFT JOIN {MAP_TABLE} AS m ON d.{col} = m.old_id WHERE d.{col} IS NOT NULL AND m.old_id IS NULL",
        table.qualified()?
    ))
}

/// Copy the parent's columns into [`ROWS_TABLE`].
pub fn capture_rows(table: &TableRef, layout: &ParentLayout) -> Result<String> {
    let columns = quote_list(&layout.columns)?;
    Ok(format!(
        "{}; SELECT {} INTO {ROWS_TABLE} FROM {}",
        drop_if_exists(ROWS_TABLE),
        columns,
        table.qualified()?
    ))
}

pub fn count_captured() -> String {
    format!("SELECT COUNT_BIG(*) FROM {ROWS_TABLE}")
}

pub fn delete_rows(table: &TableRef) -> Result<String> {
    Ok(format!("DELETE FROM {}", table.qualified()?))
}

/// Reinsert captured rows with the identifier replaced through the map.
pub fn insert_remapped(table: &TableRef, layout: &ParentLayout) -> Result<String> {
    let id = quote_mssql(&layout.id_column)?;
    let mut target_columns = vec![id.clone()];
    let mut select_columns = vec!["m.new_id".to_string()];
    for column in &layout.other_columns {
        let quoted = quote_mssql(column)?;
        select_columns.push(format!("r.{}", quoted));
        target_columns.push(quoted);
    }
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {ROWS_TABLE} AS r INNER JOIN {MAP_TABLE} AS m ON r.{id} = m.old_id ORDER BY m.new_id",
        table.qualified()?,
        target_columns.join(", "),
        select_columns.join(", ")
    ))
}

pub fn set_identity_insert(table: &TableRef, enabled: bool) -> Result<String> {
    Ok(format!(
        "SET IDENTITY_INSERT {} {}",
        table.qualified()?,
        if enabled { "ON" } else { "OFF" }
    ))
}

pub fn reseed_identity(table: &TableRef, value: i64) -> Result<String> {
    Ok(format!(
        "DBCC CHECKIDENT({}, RESEED, {}) WITH NO_INFOMSGS",
        quote_literal(&table.qualified()?),
        value
    ))
}

fn quote_list(columns: &[String]) -> Result<String> {
    Ok(columns
        .iter()
        .map(|c| quote_mssql(c))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::GenerationMode;

    fn products() -> TableRef {
        TableRef::new("dbo", "tbProduct")
    }

    fn layout() -> ParentLayout {
        ParentLayout::resolve(
            vec!["pid".into(), "name".into(), "price".into()],
            "pid",
            GenerationMode::SystemGenerated,
        )
        .unwrap()
    }

    #[test]
    fn test_rewrite_joins_through_map() {
        let sql = rewrite_column(&TableRef::new("dbo", "tbOrder"), "pid").unwrap();
        assert_eq!(
            sql,
            "UPDATE d SET d.[pid] = m.new_id FROM [dbo].[tbOrder] AS d INNER JOIN #resequence_map AS m ON d.[pid] = m.old_id"
        );
    }

    #[test]
    fn test_insert_remapped_lists_columns() {
        let sql = insert_remapped(&products(), &layout()).unwrap();
        assert!(sql.starts_with("INSERT INTO [dbo].[tbProduct] ([pid], [name], [price]) SELECT m.new_id, r.[name], r.[price]"));
        assert!(sql.contains("ON r.[pid] = m.old_id"));
    }

    #[test]
    fn test_capture_selects_layout_columns() {
        let sql = capture_rows(&products(), &layout()).unwrap();
        assert!(sql.contains("SELECT [pid], [name], [price] INTO #resequence_rows FROM [dbo].[tbProduct]"));
        assert!(sql.starts_with("IF OBJECT_ID('tempdb..#resequence_rows') IS NOT NULL"));
    }

    #[test]
    fn test_map_is_numbered_on_the_server() {
        assert_eq!(
            fill_map_from_table(&products(), "pid").unwrap(),
            "INSERT INTO #resequence_map (old_id, new_id) SELECT CAST([pid] AS BIGINT), ROW_NUMBER() OVER (ORDER BY [pid]) FROM [dbo].[tbProduct]"
        );
        assert!(map_summary().contains("FROM #resequence_map"));
    }

    #[test]
    fn test_unmapped_count_skips_nulls() {
        let sql = count_unmapped(&TableRef::new("dbo", "tbOrder"), "pid").unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT_BIG(*) FROM [dbo].[tbOrder] AS d LEFT JOIN #resequence_map AS m ON d.[pid] = m.old_id WHERE d.[pid] IS NOT NULL AND m.old_id IS NULL"
        );
    }

    #[test]
    fn test_transaction_end_turns_xact_abort_off() {
        assert!(BEGIN.starts_with("SET XACT_ABORT ON"));
        assert!(COMMIT.ends_with("SET XACT_ABORT OFF"));
        assert!(ROLLBACK.ends_with("SET XACT_ABORT OFF"));
    }

    #[test]
    fn test_map_batches_respect_values_limit() {
        let mapping = IdentifierMapping::from_ascending(1..=2500).unwrap();
        let batches = insert_map_batches(&mapping);
        assert_eq!(batches.len(), 3);
        assert!(batches[0].ends_with("(1000, 1000)"));
        assert!(batches[2].starts_with("INSERT INTO #resequence_map (old_id, new_id) VALUES (2001, 2001)"));
    }

    #[test]
    fn test_empty_mapping_has_no_batches() {
        let mapping = IdentifierMapping::from_ascending(Vec::<i64>::new()).unwrap();
        assert!(insert_map_batches(&mapping).is_empty());
    }

    #[test]
    fn test_identity_and_reseed_statements() {
        assert_eq!(
            set_identity_insert(&products(), true).unwrap(),
            "SET IDENTITY_INSERT [dbo].[tbProduct] ON"
        );
        assert_eq!(
            reseed_identity(&products(), 4).unwrap(),
            "DBCC CHECKIDENT(N'[dbo].[tbProduct]', RESEED, 4) WITH NO_INFOMSGS"
        );
    }

    #[test]
    fn test_constraint_statements() {
        let orders = TableRef::new("sales", "tb]Order");
        assert_eq!(
            suspend_constraints(&orders).unwrap(),
            "ALTER TABLE [sales].[tb]]Order] NOCHECK CONSTRAINT ALL"
        );
        assert_eq!(
            restore_constraints(&orders).unwrap(),
            "ALTER TABLE [sales].[tb]]Order] WITH CHECK CHECK CONSTRAINT ALL"
        );
    }

    #[test]
    fn test_read_identifiers_orders_ascending() {
        assert_eq!(
            read_identifiers(&products(), "pid").unwrap(),
            "SELECT CAST([pid] AS BIGINT) FROM [dbo].[tbProduct] ORDER BY [pid]"
        );
    }
}
