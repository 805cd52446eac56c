//! In-process schema driver.
//!
//! Keeps the schema as a [`SchemaSnapshot`] behind a mutex. Useful for tests,
//! dry runs and as a reference for what real drivers must report.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::introspect::{Column, Constraint, SchemaDriver, SchemaSnapshot};

/// A [`SchemaDriver`] backed by an in-memory snapshot.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    schema: Mutex<SchemaSnapshot>,
    log: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl MemoryDriver {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database holding `snapshot`.
    pub fn with_schema(snapshot: SchemaSnapshot) -> Self {
        Self {
            schema: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Current schema.
    pub fn snapshot(&self) -> SchemaSnapshot {
        self.schema.lock().clone()
    }

    /// Every DDL statement issued so far, e.g. `rename_table a b`.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Forget the statement log.
    pub fn clear_statements(&self) {
        self.log.lock().clear();
    }

    /// Make every subsequent DDL statement touching `table` fail.
    pub fn fail_on(&self, table: impl Into<String>) {
        *self.fail_on.lock() = Some(table.into());
    }

    /// Stop injecting failures.
    pub fn clear_failure(&self) {
        *self.fail_on.lock() = None;
    }

    fn record(&self, table: &str, statement: String) -> MigrateResult<()> {
        if self.fail_on.lock().as_deref() == Some(table) {
            return Err(MigrationError::database(format!(
                "injected failure on `{statement}`"
            )));
        }
        debug!(statement = %statement, "Executing DDL");
        self.log.lock().push(statement);
        Ok(())
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Vec<Column>) -> MigrateResult<T>,
    ) -> MigrateResult<T> {
        let mut schema = self.schema.lock();
        let columns = schema
            .tables
            .get_mut(table)
            .ok_or_else(|| MigrationError::database(format!("table `{table}` does not exist")))?;
        f(columns)
    }
}

fn column_mut<'a>(
    table: &str,
    columns: &'a mut [Column],
    name: &str,
) -> MigrateResult<&'a mut Column> {
    columns
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| MigrationError::database(format!("column `{table}.{name}` does not exist")))
}

#[async_trait::async_trait]
impl SchemaDriver for MemoryDriver {
    async fn show_tables(&self) -> MigrateResult<SchemaSnapshot> {
        Ok(self.snapshot())
    }

    async fn create_table(&self, table: &str, columns: &[Column]) -> MigrateResult<()> {
        self.record(table, format!("create_table {table}"))?;
        let mut schema = self.schema.lock();
        if schema.contains_table(table) {
            return Err(MigrationError::database(format!(
                "table `{table}` already exists"
            )));
        }
        schema.tables.insert(table.to_string(), columns.to_vec());
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> MigrateResult<()> {
        self.record(table, format!("drop_table {table}"))?;
        self.schema
            .lock()
            .tables
            .shift_remove(table)
            .map(|_| ())
            .ok_or_else(|| MigrationError::database(format!("table `{table}` does not exist")))
    }

    async fn rename_table(&self, from: &str, to: &str) -> MigrateResult<()> {
        self.record(from, format!("rename_table {from} {to}"))?;
        let mut schema = self.schema.lock();
        if schema.contains_table(to) {
            return Err(MigrationError::database(format!("table `{to}` already exists")));
        }
        let index = schema
            .tables
            .get_index_of(from)
            .ok_or_else(|| MigrationError::database(format!("table `{from}` does not exist")))?;
        let (_, columns) = schema
            .tables
            .shift_remove_index(index)
            .ok_or_else(|| MigrationError::database(format!("table `{from}` does not exist")))?;
        schema.tables.shift_insert(index, to.to_string(), columns);

        for column in schema.tables.values_mut().flatten() {
            if let Some(fk) = column.foreign_key.as_mut().filter(|fk| fk.table == from) {
                fk.table = to.to_string();
            }
        }
        Ok(())
    }

    async fn add_column(
        &self,
        table: &str,
        column: &Column,
        position: Option<usize>,
    ) -> MigrateResult<()> {
        self.record(table, format!("add_column {table}.{}", column.name))?;
        self.with_table(table, |columns| {
            if columns.iter().any(|c| c.name == column.name) {
                return Err(MigrationError::database(format!(
                    "column `{table}.{}` already exists",
                    column.name
                )));
            }
            let index = position.map_or(columns.len(), |p| p.min(columns.len()));
            columns.insert(index, column.clone());
            Ok(())
        })
    }

    async fn change_column(&self, table: &str, column: &Column) -> MigrateResult<()> {
        self.record(table, format!("change_column {table}.{}", column.name))?;
        self.with_table(table, |columns| {
            let existing = column_mut(table, columns, &column.name)?;
            // Constraints are managed separately.
            let foreign_key = existing.foreign_key.take();
            let (on_delete, on_update) = (existing.on_delete, existing.on_update);
            *existing = Column {
                foreign_key,
                on_delete,
                on_update,
                ..column.clone()
            };
            Ok(())
        })
    }

    async fn remove_column(&self, table: &str, column: &str) -> MigrateResult<()> {
        self.record(table, format!("remove_column {table}.{column}"))?;
        self.with_table(table, |columns| {
            let index = columns
                .iter()
                .position(|c| c.name == column)
                .ok_or_else(|| {
                    MigrationError::database(format!("column `{table}.{column}` does not exist"))
                })?;
            columns.remove(index);
            Ok(())
        })
    }

    async fn rename_column(&self, table: &str, from: &str, to: &str) -> MigrateResult<()> {
        self.record(table, format!("rename_column {table}.{from} {to}"))?;
        let mut schema = self.schema.lock();
        {
            let columns = schema.tables.get_mut(table).ok_or_else(|| {
                MigrationError::database(format!("table `{table}` does not exist"))
            })?;
            if columns.iter().any(|c| c.name == to) {
                return Err(MigrationError::database(format!(
                    "column `{table}.{to}` already exists"
                )));
            }
            column_mut(table, columns, from)?.name = to.to_string();
        }

        for column in schema.tables.values_mut().flatten() {
            if let Some(fk) = column
                .foreign_key
                .as_mut()
                .filter(|fk| fk.table == table && fk.column == from)
            {
                fk.column = to.to_string();
            }
        }
        Ok(())
    }

    async fn add_constraint(&self, table: &str, constraint: &Constraint) -> MigrateResult<()> {
        self.record(table, format!("add_constraint {}", constraint.name(table)))?;
        self.with_table(table, |columns| {
            let column = column_mut(table, columns, &constraint.column)?;
            column.foreign_key = Some(constraint.references.clone());
            column.on_delete = constraint.on_delete;
            column.on_update = constraint.on_update;
            Ok(())
        })
    }

    async fn drop_constraint(&self, table: &str, constraint: &Constraint) -> MigrateResult<()> {
        self.record(table, format!("drop_constraint {}", constraint.name(table)))?;
        self.with_table(table, |columns| {
            let column = column_mut(table, columns, &constraint.column)?;
            column.foreign_key = None;
            column.on_delete = None;
            column.on_update = None;
            Ok(())
        })
    }
}
