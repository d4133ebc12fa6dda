use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// A fixed-size slice of the source. Every column is Utf8 at this stage;
/// typed coercion happens in the normalizer.
pub struct Page {
    /// Zero-based position of this page within the source.
    pub index: usize,
    pub batch: RecordBatch,
}

impl Page {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Read-once cursor over a delimited-text source (plain or gzip), yielding
/// pages of at most `page_size` records in source order.
pub struct PagedReader {
    path: PathBuf,
    schema: SchemaRef,
    batches: arrow::csv::reader::BufReader<Box<dyn BufRead + Send>>,
    next_index: usize,
    done: bool,
}

impl PagedReader {
    /// Open `path`, read its header row, and prepare to page through the
    /// records. `page_size` must be at least 1.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            PipelineError::Acquisition(format!("opening {}: {}", path.display(), e))
        })?;

        let mut input: Box<dyn BufRead + Send> =
            if path.extension().map_or(false, |ext| ext == "gz") {
                Box::new(BufReader::new(MultiGzDecoder::new(file)))
            } else {
                Box::new(BufReader::new(file))
            };

        let headers = read_header(&mut input, path)?;
        debug!(file = %path.display(), columns = headers.len(), "opened source");

        let fields: Vec<Field> = headers
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        // The header line is already consumed, so the CSV reader sees data
        // rows only.
        let batches = ReaderBuilder::new(schema.clone())
            .with_header(false)
            .with_batch_size(page_size)
            .build_buffered(input)
            .map_err(|e| {
                PipelineError::Parse(format!("reading {}: {}", path.display(), e))
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            schema,
            batches,
            next_index: 0,
            done: false,
        })
    }

    /// Column layout of the source: every header as a nullable Utf8 field.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Pull the next page. `Ok(None)` marks the end of the data; once
    /// returned, all later calls return it too.
    pub fn next_page(&mut self) -> PipelineResult<Option<Page>> {
        if self.done {
            return Ok(None);
        }
        match self.batches.next() {
            Some(Ok(batch)) => {
                let index = self.next_index;
                self.next_index += 1;
                Ok(Some(Page { index, batch }))
            }
            Some(Err(e)) => {
                self.done = true;
                Err(PipelineError::Parse(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Drain the whole source into a single page (single-shot mode).
    pub fn read_single_page(mut self) -> PipelineResult<Page> {
        let mut batches = Vec::new();
        while let Some(page) = self.next_page()? {
            batches.push(page.batch);
        }
        let batch = if batches.is_empty() {
            RecordBatch::new_empty(self.schema.clone())
        } else {
            concat_batches(&self.schema, &batches).map_err(|e| {
                PipelineError::Parse(format!("reading {}: {}", self.path.display(), e))
            })?
        };
        Ok(Page { index: 0, batch })
    }
}

/// Parse the header line into column names using a real CSV parser, so
/// quoted names with embedded commas survive.
fn read_header<R: BufRead>(input: &mut R, path: &Path) -> PipelineResult<Vec<String>> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|e| PipelineError::Parse(format!("reading {}: {}", path.display(), e)))?;
    if line.trim().is_empty() {
        return Err(PipelineError::Parse(format!(
            "{}: missing header row",
            path.display()
        )));
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes());
    let record = rdr
        .records()
        .next()
        .ok_or_else(|| {
            PipelineError::Parse(format!("{}: missing header row", path.display()))
        })?
        .map_err(|e| PipelineError::Parse(format!("{}: {}", path.display(), e)))?;

    Ok(record.iter().map(|s| s.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn write_rows(dir: &Path, name: &str, rows: usize) -> Result<PathBuf> {
        let mut content = String::from("Id,Pickup,Note\n");
        for i in 0..rows {
            content.push_str(&format!("{},2021-01-01 00:00:{:02},row\n", i, i % 60));
        }
        let path = dir.join(name);
        if name.ends_with(".gz") {
            let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(content.as_bytes())?;
            std::fs::write(&path, enc.finish()?)?;
        } else {
            std::fs::write(&path, content)?;
        }
        Ok(path)
    }

    #[test]
    fn pages_in_source_order_with_short_tail() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_rows(dir.path(), "trips.csv", 250)?;

        let mut reader = PagedReader::open(&path, 100)?;
        let mut sizes = Vec::new();
        let mut indexes = Vec::new();
        while let Some(page) = reader.next_page()? {
            indexes.push(page.index);
            sizes.push(page.num_rows());
        }
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(indexes, vec![0, 1, 2]);
        // end of data is sticky
        assert!(reader.next_page()?.is_none());
        assert!(reader.next_page()?.is_none());
        Ok(())
    }

    #[test]
    fn gzip_source_pages_identically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let plain = write_rows(dir.path(), "trips.csv", 42)?;
        let gz = write_rows(dir.path(), "trips.csv.gz", 42)?;

        let mut a = PagedReader::open(&plain, 20)?;
        let mut b = PagedReader::open(&gz, 20)?;
        loop {
            match (a.next_page()?, b.next_page()?) {
                (Some(x), Some(y)) => assert_eq!(x.batch, y.batch),
                (None, None) => break,
                _ => panic!("page counts differ between plain and gzip"),
            }
        }
        Ok(())
    }

    #[test]
    fn single_page_drains_everything() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_rows(dir.path(), "zones.csv", 265)?;

        let page = PagedReader::open(&path, 100)?.read_single_page()?;
        assert_eq!(page.index, 0);
        assert_eq!(page.num_rows(), 265);
        Ok(())
    }

    #[test]
    fn header_only_source_yields_no_pages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "Id,Pickup,Note\n")?;

        let mut reader = PagedReader::open(&path, 100)?;
        assert_eq!(reader.schema().fields().len(), 3);
        assert!(reader.next_page()?.is_none());

        let page = PagedReader::open(&path, 100)?.read_single_page()?;
        assert_eq!(page.num_rows(), 0);
        assert_eq!(page.batch.num_columns(), 3);
        Ok(())
    }

    #[test]
    fn empty_file_is_a_parse_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("none.csv");
        std::fs::write(&path, "")?;

        match PagedReader::open(&path, 100) {
            Err(PipelineError::Parse(msg)) => assert!(msg.contains("missing header")),
            other => panic!("expected parse error, got {:?}", other.map(|_| ())),
        }
        Ok(())
    }

    #[test]
    fn missing_file_is_an_acquisition_error() {
        match PagedReader::open("/no/such/file.csv", 100) {
            Err(PipelineError::Acquisition(_)) => {}
            other => panic!("expected acquisition error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn ragged_row_is_a_parse_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ragged.csv");
        std::fs::write(&path, "Id,Pickup,Note\n1,2021-01-01 00:00:00,ok\n2\n")?;

        let mut reader = PagedReader::open(&path, 100)?;
        match reader.next_page() {
            Err(PipelineError::Parse(_)) => {}
            other => panic!("expected parse error, got {:?}", other.map(|p| p.is_some())),
        }
        // the cursor stays finished after a failure
        assert!(reader.next_page()?.is_none());
        Ok(())
    }

    #[test]
    fn quoted_header_names_survive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("quoted.csv");
        std::fs::write(&path, "\"Zone, Name\",Borough\nEWR,Newark\n")?;

        let reader = PagedReader::open(&path, 10)?;
        let names: Vec<&String> = reader.schema().fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["Zone, Name", "Borough"]);
        Ok(())
    }
}
