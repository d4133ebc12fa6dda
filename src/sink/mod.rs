use std::path::Path;
use std::time::{Duration, Instant};

use arrow::array::{Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Schema, TimeUnit};
use duckdb::types::{TimeUnit as DuckTimeUnit, Value};
use duckdb::{params, Connection, ToSql};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::reader::Page;

/// Append-only warehouse handle around an embedded DuckDB connection. The
/// handle is passed explicitly through every call; nothing in the crate
/// deletes or rewrites rows.
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    /// Open (or create) a warehouse database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Create `table` from `schema` if it does not exist yet; if it does,
    /// verify the column names line up with the load.
    pub fn ensure_table(&self, table: &str, schema: &Schema) -> PipelineResult<()> {
        match self.table_columns(table)? {
            Some(existing) => {
                let expected: Vec<String> =
                    schema.fields().iter().map(|f| f.name().clone()).collect();
                if existing != expected {
                    return Err(PipelineError::Sink(format!(
                        "table {} exists with columns {:?}, load needs {:?}",
                        table, existing, expected
                    )));
                }
            }
            None => {
                let columns = schema
                    .fields()
                    .iter()
                    .map(|f| {
                        Ok(format!(
                            "\"{}\" {}",
                            f.name(),
                            sql_type(f.data_type(), f.name())?
                        ))
                    })
                    .collect::<PipelineResult<Vec<String>>>()?
                    .join(", ");
                let ddl = format!("CREATE TABLE \"{}\" ({})", table, columns);
                debug!(table = %table, "creating table");
                self.conn.execute(&ddl, [])?;
            }
        }
        Ok(())
    }

    /// Append every record of `page` to `table` in source row order via the
    /// DuckDB appender. Returns the wall-clock append time, for progress
    /// reporting only.
    pub fn append(&self, table: &str, page: &Page) -> PipelineResult<Duration> {
        let schema = page.batch.schema();
        let mut columns: Vec<Vec<Value>> = Vec::with_capacity(page.batch.num_columns());
        for (i, field) in schema.fields().iter().enumerate() {
            columns.push(column_values(page.batch.column(i), field.name())?);
        }

        let mut appender = self.conn.appender(table)?;
        let start = Instant::now();
        for row in 0..page.num_rows() {
            let refs: Vec<&dyn ToSql> =
                columns.iter().map(|col| &col[row] as &dyn ToSql).collect();
            appender.append_row(&refs[..])?;
        }
        appender.flush()?;
        Ok(start.elapsed())
    }

    /// Column names of `table` in ordinal order, or `None` when the table
    /// does not exist.
    pub fn table_columns(&self, table: &str) -> PipelineResult<Option<Vec<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(if columns.is_empty() {
            None
        } else {
            Some(columns)
        })
    }

    pub fn row_count(&self, table: &str) -> PipelineResult<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn sql_type(data_type: &DataType, name: &str) -> PipelineResult<&'static str> {
    match data_type {
        DataType::Utf8 => Ok("VARCHAR"),
        DataType::Float64 => Ok("DOUBLE"),
        DataType::Timestamp(TimeUnit::Microsecond, None) => Ok("TIMESTAMP"),
        other => Err(PipelineError::Sink(format!(
            "column {}: no warehouse type for {:?}",
            name, other
        ))),
    }
}

/// Materialize one arrow column as DuckDB values, row by row.
fn column_values(array: &ArrayRef, name: &str) -> PipelineResult<Vec<Value>> {
    match array.data_type() {
        DataType::Utf8 => {
            let a = downcast::<StringArray>(array, name)?;
            Ok((0..a.len())
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(a.value(i).to_string())
                    }
                })
                .collect())
        }
        DataType::Float64 => {
            let a = downcast::<Float64Array>(array, name)?;
            Ok((0..a.len())
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Double(a.value(i))
                    }
                })
                .collect())
        }
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            let a = downcast::<TimestampMicrosecondArray>(array, name)?;
            Ok((0..a.len())
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Timestamp(DuckTimeUnit::Microsecond, a.value(i))
                    }
                })
                .collect())
        }
        other => Err(PipelineError::Sink(format!(
            "column {}: no warehouse type for {:?}",
            name, other
        ))),
    }
}

fn downcast<'a, T: Array + 'static>(
    array: &'a ArrayRef,
    name: &str,
) -> PipelineResult<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        PipelineError::Sink(format!(
            "column {}: array does not match its declared type {:?}",
            name,
            array.data_type()
        ))
    })
}
