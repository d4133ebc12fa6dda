use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Builder, StringArray, TimestampMicrosecondBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::reader::Page;
use crate::ingest::timestamp::parse_timestamp_micros;

/// Per-dataset normalization configuration: the columns that must become
/// timestamps. Names are given lowercase and matched after lowercasing
/// the source headers.
#[derive(Debug, Clone)]
pub struct NormalizeRules {
    pub timestamp_columns: Vec<String>,
}

/// Column plan derived once from the first page of a load and applied to
/// every page: lowercased names plus the final type of each column.
pub struct NormalizePlan {
    schema: SchemaRef,
}

impl NormalizePlan {
    /// Derive the normalized schema: lowercase every name, type designated
    /// columns as timestamps, and probe the first non-empty value of each
    /// remaining column for numbers.
    pub fn from_first_page(page: &Page, rules: &NormalizeRules) -> PipelineResult<Self> {
        let source = page.batch.schema();
        let mut fields = Vec::with_capacity(source.fields().len());

        for (i, field) in source.fields().iter().enumerate() {
            let name = field.name().to_lowercase();
            let sarr = utf8_column(&page.batch, i, &name)?;

            let data_type = if rules.timestamp_columns.contains(&name) {
                DataType::Timestamp(TimeUnit::Microsecond, None)
            } else {
                match sarr.iter().find_map(|v| v.filter(|s| !s.trim().is_empty())) {
                    Some(probe) if probe.trim().parse::<f64>().is_ok() => DataType::Float64,
                    _ => DataType::Utf8,
                }
            };
            fields.push(Field::new(name, data_type, true));
        }

        for wanted in &rules.timestamp_columns {
            if !fields.iter().any(|f| f.name() == wanted) {
                return Err(PipelineError::Normalization(format!(
                    "designated timestamp column {:?} not present in source",
                    wanted
                )));
            }
        }

        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

/// Apply `plan` to one page. Pure: the input is left untouched and a new
/// page with the same index comes back. A non-empty designated timestamp
/// value that does not parse fails the whole page; numeric coercion
/// failures become null.
pub fn normalize_page(page: &Page, plan: &NormalizePlan) -> PipelineResult<Page> {
    let fields = plan.schema.fields();
    if page.batch.num_columns() != fields.len() {
        return Err(PipelineError::Normalization(format!(
            "page {} has {} columns, plan expects {}",
            page.index,
            page.batch.num_columns(),
            fields.len()
        )));
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        let sarr = utf8_column(&page.batch, i, field.name())?;
        let column = match field.data_type() {
            DataType::Timestamp(TimeUnit::Microsecond, None) => {
                let mut b = TimestampMicrosecondBuilder::with_capacity(sarr.len());
                for opt in sarr.iter() {
                    match opt {
                        None => b.append_null(),
                        Some(s) if s.trim().is_empty() => b.append_null(),
                        Some(s) => match parse_timestamp_micros(s) {
                            Some(micros) => b.append_value(micros),
                            None => {
                                return Err(PipelineError::Normalization(format!(
                                    "page {}: column {}: {:?} is not a timestamp",
                                    page.index,
                                    field.name(),
                                    s
                                )))
                            }
                        },
                    }
                }
                Arc::new(b.finish()) as ArrayRef
            }
            DataType::Float64 => {
                let mut b = Float64Builder::with_capacity(sarr.len());
                for opt in sarr.iter() {
                    b.append_option(opt.and_then(|s| s.trim().parse::<f64>().ok()));
                }
                Arc::new(b.finish()) as ArrayRef
            }
            _ => page.batch.column(i).clone(),
        };
        columns.push(column);
    }

    let batch = RecordBatch::try_new(plan.schema.clone(), columns)
        .map_err(|e| PipelineError::Normalization(format!("page {}: {}", page.index, e)))?;
    Ok(Page {
        index: page.index,
        batch,
    })
}

fn utf8_column<'a>(
    batch: &'a RecordBatch,
    i: usize,
    name: &str,
) -> PipelineResult<&'a StringArray> {
    batch
        .column(i)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            PipelineError::Normalization(format!(
                "column {} is {:?}, expected Utf8 input",
                name,
                batch.column(i).data_type()
            ))
        })
}
