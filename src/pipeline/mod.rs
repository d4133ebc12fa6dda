// src/pipeline/mod.rs

use tracing::info;

use crate::error::PipelineResult;
use crate::ingest::normalize::{normalize_page, NormalizePlan, NormalizeRules};
use crate::ingest::reader::PagedReader;
use crate::sink::Warehouse;

/// Summary of a completed load.
#[derive(Debug)]
pub struct LoadOutcome {
    pub table: String,
    pub pages: usize,
    pub rows: usize,
}

/// Stream `reader` into `sink.table` page by page, strictly in source
/// order: pull a page, normalize it, append it, repeat until the reader is
/// exhausted. The first page fixes the normalization plan and creates the
/// table when missing. Any stage error aborts the remaining pages; pages
/// already appended stay in the sink.
pub fn load_chunked(
    mut reader: PagedReader,
    rules: &NormalizeRules,
    sink: &Warehouse,
    table: &str,
) -> PipelineResult<LoadOutcome> {
    let first = match reader.next_page()? {
        Some(page) => page,
        None => {
            info!(table = %table, "source has no records");
            return Ok(LoadOutcome {
                table: table.to_string(),
                pages: 0,
                rows: 0,
            });
        }
    };

    let plan = NormalizePlan::from_first_page(&first, rules)?;
    sink.ensure_table(table, plan.schema())?;

    let mut pages = 0usize;
    let mut rows = 0usize;
    let mut next = Some(first);
    while let Some(page) = next {
        let normalized = normalize_page(&page, &plan)?;
        let took = sink.append(table, &normalized)?;
        pages += 1;
        rows += normalized.num_rows();
        info!(
            table = %table,
            page = page.index,
            rows = normalized.num_rows(),
            took = ?took,
            "appended page"
        );
        next = reader.next_page()?;
    }

    info!(table = %table, pages, rows, "load complete");
    Ok(LoadOutcome {
        table: table.to_string(),
        pages,
        rows,
    })
}

/// Load the whole source as one page and append it once. Meant for small
/// datasets like the zone lookup.
pub fn load_single_shot(
    reader: PagedReader,
    rules: &NormalizeRules,
    sink: &Warehouse,
    table: &str,
) -> PipelineResult<LoadOutcome> {
    let page = reader.read_single_page()?;
    let plan = NormalizePlan::from_first_page(&page, rules)?;
    sink.ensure_table(table, plan.schema())?;

    let normalized = normalize_page(&page, &plan)?;
    let took = sink.append(table, &normalized)?;
    info!(
        table = %table,
        rows = normalized.num_rows(),
        took = ?took,
        "appended"
    );

    Ok(LoadOutcome {
        table: table.to_string(),
        pages: 1,
        rows: normalized.num_rows(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use anyhow::Result;
    use std::path::{Path, PathBuf};
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,triploader::pipeline=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn rules() -> NormalizeRules {
        NormalizeRules {
            timestamp_columns: vec!["lpep_pickup_datetime".to_string()],
        }
    }

    /// Write a trip-shaped CSV with mixed-case headers; `bad_at` poisons one
    /// designated timestamp value.
    fn write_trips_csv(
        dir: &Path,
        name: &str,
        rows: usize,
        bad_at: Option<usize>,
    ) -> Result<PathBuf> {
        let mut content = String::from("VendorID,Lpep_Pickup_Datetime,Total_Amount\n");
        for i in 0..rows {
            if bad_at == Some(i) {
                content.push_str(&format!("{},not a time,{}.25\n", i % 3 + 1, i));
            } else {
                content.push_str(&format!(
                    "{},2021-01-{:02} {:02}:{:02}:{:02},{}.25\n",
                    i % 3 + 1,
                    i % 28 + 1,
                    i / 3600 % 24,
                    i / 60 % 60,
                    i % 60,
                    i
                ));
            }
        }
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    #[test]
    fn chunked_load_preserves_every_record() -> Result<()> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let path = write_trips_csv(dir.path(), "trips.csv", 250_000, None)?;
        let sink = Warehouse::open_in_memory()?;

        let reader = PagedReader::open(&path, 100_000)?;
        let outcome = load_chunked(reader, &rules(), &sink, "trips")?;

        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.rows, 250_000);
        assert_eq!(sink.row_count("trips")?, 250_000);
        // column names were lowercased on the way in
        assert_eq!(
            sink.table_columns("trips")?,
            Some(vec![
                "vendorid".to_string(),
                "lpep_pickup_datetime".to_string(),
                "total_amount".to_string()
            ])
        );
        Ok(())
    }

    #[test]
    fn bad_timestamp_stops_before_later_pages() -> Result<()> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        // rows 0..99 land in page 0; the poisoned row 150 is in page 1
        let path = write_trips_csv(dir.path(), "trips.csv", 160, Some(150))?;
        let sink = Warehouse::open_in_memory()?;

        let reader = PagedReader::open(&path, 100)?;
        match load_chunked(reader, &rules(), &sink, "trips") {
            Err(PipelineError::Normalization(msg)) => {
                assert!(msg.contains("lpep_pickup_datetime"))
            }
            other => panic!("expected normalization error, got {:?}", other),
        }
        // the first page was already committed, nothing after it
        assert_eq!(sink.row_count("trips")?, 100);
        Ok(())
    }

    #[test]
    fn rerunning_a_load_appends_again() -> Result<()> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let path = write_trips_csv(dir.path(), "trips.csv", 250, None)?;
        let sink = Warehouse::open_in_memory()?;

        let first = load_chunked(PagedReader::open(&path, 100)?, &rules(), &sink, "trips")?;
        assert_eq!(first.pages, 3);
        assert_eq!(sink.row_count("trips")?, 250);

        let second = load_chunked(PagedReader::open(&path, 100)?, &rules(), &sink, "trips")?;
        assert_eq!(second.rows, 250);
        assert_eq!(sink.row_count("trips")?, 500);
        Ok(())
    }

    #[test]
    fn single_shot_appends_exactly_once() -> Result<()> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let path = write_trips_csv(dir.path(), "zones.csv", 265, None)?;
        let sink = Warehouse::open_in_memory()?;

        let reader = PagedReader::open(&path, 100)?;
        let outcome = load_single_shot(reader, &rules(), &sink, "zones")?;

        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.rows, 265);
        assert_eq!(sink.row_count("zones")?, 265);
        Ok(())
    }

    #[test]
    fn chunked_load_of_header_only_source_is_a_no_op() -> Result<()> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("trips.csv");
        std::fs::write(&path, "VendorID,Lpep_Pickup_Datetime,Total_Amount\n")?;
        let sink = Warehouse::open_in_memory()?;

        let outcome = load_chunked(PagedReader::open(&path, 100)?, &rules(), &sink, "trips")?;
        assert_eq!(outcome.pages, 0);
        assert_eq!(outcome.rows, 0);
        assert_eq!(sink.table_columns("trips")?, None);
        Ok(())
    }

    #[test]
    fn mismatched_existing_table_fails_before_any_append() -> Result<()> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let path = write_trips_csv(dir.path(), "trips.csv", 10, None)?;
        let sink = Warehouse::open_in_memory()?;

        let other = arrow::datatypes::Schema::new(vec![arrow::datatypes::Field::new(
            "somethingelse",
            arrow::datatypes::DataType::Utf8,
            true,
        )]);
        sink.ensure_table("trips", &other)?;

        match load_chunked(PagedReader::open(&path, 100)?, &rules(), &sink, "trips") {
            Err(PipelineError::Sink(_)) => {}
            other => panic!("expected sink error, got {:?}", other),
        }
        assert_eq!(sink.row_count("trips")?, 0);
        Ok(())
    }
}
