//! Record sources feeding a clustering job.
//!
//! A [`RecordSource`] hands the job a finite, fully loaded set of records.
//! Any failure is reported as [`Error::SourceLoadFailure`] and aborts the job
//! before a single shard is dispatched.
//!
//! Sources reject records with non-finite coordinates, since those cannot be
//! encoded on the wire.

use crate::config::{CoordinatorConfig, DEFAULT_INPUT_TIMEOUT, InputFormat, InputLocation};
use core::time::Duration;
use geocluster_core::{Error, Record, Result};
use std::path::{Path, PathBuf};

/// Supplies the full dataset for one job.
pub trait RecordSource: Send + Sync {
    fn load(&self) -> impl Future<Output = Result<Vec<Record>>> + Send;
}

/// Records already held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    pub const fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

impl RecordSource for MemorySource {
    async fn load(&self) -> Result<Vec<Record>> {
        validate(&self.records, "memory")?;
        Ok(self.records.clone())
    }
}

/// A UTF-8 CSV file with one `latitude,longitude,category,timestamp` record
/// per row. See [`parse_csv`] for the accepted dialect.
#[derive(Clone, Debug)]
pub struct CsvFileSource {
    path: PathBuf,
    has_header: bool,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>, has_header: bool) -> Self {
        Self {
            path: path.into(),
            has_header,
        }
    }
}

impl RecordSource for CsvFileSource {
    async fn load(&self) -> Result<Vec<Record>> {
        let text = read_to_string(&self.path).await?;
        parse_csv(&text, self.has_header).map_err(|e| match e {
            Error::SourceLoadFailure { context } => Error::SourceLoadFailure {
                context: format!("{}: {context}", self.path.display()),
            },
            other => other,
        })
    }
}

/// A file holding a JSON array of records.
#[derive(Clone, Debug)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for JsonFileSource {
    async fn load(&self) -> Result<Vec<Record>> {
        let text = read_to_string(&self.path).await?;
        let location = self.path.display().to_string();
        let records: Vec<Record> =
            serde_json::from_str(&text).map_err(|e| Error::SourceLoadFailure {
                context: format!("{location}: {e}"),
            })?;
        validate(&records, &location)?;
        Ok(records)
    }
}

/// File source chosen at runtime from [`InputFormat`].
#[derive(Clone, Debug)]
pub enum FileSource {
    Csv(CsvFileSource),
    Json(JsonFileSource),
}

impl FileSource {
    pub fn new(format: InputFormat, path: impl Into<PathBuf>, has_header: bool) -> Self {
        match format {
            InputFormat::Csv => Self::Csv(CsvFileSource::new(path, has_header)),
            InputFormat::Json => Self::Json(JsonFileSource::new(path)),
        }
    }
}

impl RecordSource for FileSource {
    async fn load(&self) -> Result<Vec<Record>> {
        match self {
            Self::Csv(source) => source.load().await,
            Self::Json(source) => source.load().await,
        }
    }
}

/// Records fetched over HTTP(S) as a CSV body.
///
/// Any transport error, non-success status or unreadable body is a
/// [`Error::SourceLoadFailure`]. The whole request, body included, must finish
/// within the configured timeout.
#[derive(Clone, Debug)]
pub struct HttpCsvSource {
    url: String,
    has_header: bool,
    timeout: Duration,
}

impl HttpCsvSource {
    pub fn new(url: impl Into<String>, has_header: bool) -> Self {
        Self {
            url: url.into(),
            has_header,
            timeout: DEFAULT_INPUT_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self) -> reqwest::Result<String> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

impl RecordSource for HttpCsvSource {
    async fn load(&self) -> Result<Vec<Record>> {
        tracing::debug!(url = %self.url, "Fetching records");
        let text = self.fetch().await.map_err(|e| Error::SourceLoadFailure {
            context: format!("{}: {e}", self.url),
        })?;

        parse_csv(&text, self.has_header).map_err(|e| match e {
            Error::SourceLoadFailure { context } => Error::SourceLoadFailure {
                context: format!("{}: {context}", self.url),
            },
            other => other,
        })
    }
}

/// The coordinator's configured input: a local file or a URL.
#[derive(Clone, Debug)]
pub enum InputSource {
    File(FileSource),
    Http(HttpCsvSource),
}

impl InputSource {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        match &config.input {
            InputLocation::Path(path) => {
                Self::File(FileSource::new(config.format, path, config.has_header))
            }
            InputLocation::Url(url) => Self::Http(
                HttpCsvSource::new(url.as_str(), config.has_header)
                    .with_timeout(config.input_timeout),
            ),
        }
    }
}

impl RecordSource for InputSource {
    async fn load(&self) -> Result<Vec<Record>> {
        match self {
            Self::File(source) => source.load().await,
            Self::Http(source) => source.load().await,
        }
    }
}

/// Parses CSV text into records.
///
/// The dialect is RFC 4180: fields may be double-quoted, so a quoted category
/// can contain commas, quotes or newlines. Surrounding whitespace is trimmed
/// and blank lines are skipped. With `has_header` the first row is ignored.
///
/// # Errors
///
/// Returns [`Error::SourceLoadFailure`] naming the line of the first bad row:
/// malformed CSV, a wrong field count, an unparsable coordinate, or a
/// non-finite coordinate.
pub fn parse_csv(text: &str, has_header: bool) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| {
            let line_no = e.position().map_or(0, csv::Position::line);
            Error::SourceLoadFailure {
                context: format!("line {line_no}: {e}"),
            }
        })?;
        let line_no = row.position().map_or(0, csv::Position::line);

        if row.iter().all(str::is_empty) {
            continue;
        }

        let fields: Vec<&str> = row.iter().collect();
        let [lat, lon, category, timestamp] = fields[..] else {
            return Err(Error::SourceLoadFailure {
                context: format!("line {line_no}: expected 4 fields, found {}", fields.len()),
            });
        };

        records.push(Record::new(
            parse_coordinate(lat, "latitude", line_no)?,
            parse_coordinate(lon, "longitude", line_no)?,
            category,
            timestamp,
        ));
    }

    Ok(records)
}

fn parse_coordinate(raw: &str, field: &str, line_no: u64) -> Result<f64> {
    let value: f64 = raw.parse().map_err(|e| Error::SourceLoadFailure {
        context: format!("line {line_no}: invalid {field} {raw:?}: {e}"),
    })?;

    if !value.is_finite() {
        return Err(Error::SourceLoadFailure {
            context: format!("line {line_no}: {field} must be finite, got {raw:?}"),
        });
    }

    Ok(value)
}

fn validate(records: &[Record], location: &str) -> Result<()> {
    match records.iter().position(|r| !r.has_finite_coordinates()) {
        Some(pos) => Err(Error::SourceLoadFailure {
            context: format!("{location}: record {pos} has non-finite coordinates"),
        }),
        None => Ok(()),
    }
}

async fn read_to_string(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::SourceLoadFailure {
            context: format!("{}: {e}", path.display()),
        })
}
