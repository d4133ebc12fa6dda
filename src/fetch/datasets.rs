use crate::ingest::normalize::NormalizeRules;

static TRIP_BASE_URL: &str =
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download";
static ZONE_LOOKUP_URL: &str =
    "https://s3.amazonaws.com/nyc-tlc/misc/taxi+_zone_lookup.csv";

static GREEN_TIMESTAMP_COLUMNS: &[&str] = &["lpep_pickup_datetime", "lpep_dropoff_datetime"];
static YELLOW_TIMESTAMP_COLUMNS: &[&str] = &["tpep_pickup_datetime", "tpep_dropoff_datetime"];

/// Service color of a monthly trip file. Green and yellow feeds carry the
/// same layout apart from the `lpep_`/`tpep_` datetime column prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Yellow,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Green => "green",
            Color::Yellow => "yellow",
        }
    }
}

/// One downloadable dataset: where it lives and which of its columns are
/// timestamps.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub url: String,
    pub timestamp_columns: &'static [&'static str],
}

impl Dataset {
    pub fn rules(&self) -> NormalizeRules {
        NormalizeRules {
            timestamp_columns: self
                .timestamp_columns
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Canonical file stem of a monthly trip file, e.g.
/// `green_tripdata_2021-01`.
pub fn trip_file_stem(color: Color, year: u16, month: u8) -> String {
    format!("{}_tripdata_{}-{:02}", color.as_str(), year, month)
}

/// The gzip-compressed CSV release for one month of trip records.
pub fn trip_data(color: Color, year: u16, month: u8) -> Dataset {
    Dataset {
        url: format!(
            "{}/{}/{}.csv.gz",
            TRIP_BASE_URL,
            color.as_str(),
            trip_file_stem(color, year, month)
        ),
        timestamp_columns: match color {
            Color::Green => GREEN_TIMESTAMP_COLUMNS,
            Color::Yellow => YELLOW_TIMESTAMP_COLUMNS,
        },
    }
}

/// The taxi-zone lookup table; small enough for a single-shot load and has
/// no timestamp columns.
pub fn zone_lookup() -> Dataset {
    Dataset {
        url: ZONE_LOOKUP_URL.to_string(),
        timestamp_columns: &[],
    }
}
