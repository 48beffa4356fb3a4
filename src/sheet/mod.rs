//! Spreadsheet input: local or downloaded xlsx, csv and Numbers files as a plain string table

pub mod numbers;
pub mod xlsx;

use std::path::{Path, PathBuf};

use reqwest::header::AUTHORIZATION;
use tracing::info;

use crate::config::{NumbersSettings, SheetFormat};
use crate::error::SheetError;

/// A header row plus data rows, every cell as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Use the first row as the header. Cells are trimmed and short rows padded.
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Result<Self, SheetError> {
        rows.retain(|row| row.iter().any(|cell| !cell.trim().is_empty()));
        if rows.is_empty() {
            return Err(SheetError::EmptyTable);
        }
        let header: Vec<String> = rows.remove(0).into_iter().map(|h| h.trim().to_string()).collect();
        let width = header.len();
        for row in &mut rows {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }
        Ok(Self { header, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Indices of `names`, or the list of those missing.
    pub fn require<const N: usize>(&self, names: [&str; N]) -> Result<[usize; N], SheetError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| self.column(name).is_none())
            .map(|name| (*name).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SheetError::MissingColumns(missing));
        }
        Ok(names.map(|name| self.column(name).unwrap_or_default()))
    }
}

/// Where the spreadsheet comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Path(PathBuf),
    Url(String),
}

impl Source {
    pub fn parse(input: &str) -> Self {
        if input.starts_with("http://") || input.starts_with("https://") {
            Self::Url(input.to_string())
        } else {
            Self::Path(PathBuf::from(input))
        }
    }

    /// File name used to guess the format, with URL query and escapes removed.
    fn file_name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Self::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or_default();
                let last = path.rsplit('/').next().unwrap_or_default();
                urlencoding::decode(last)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| last.to_string())
            }
        }
    }
}

/// Guess the format from a file extension.
pub fn detect_format(name: &str) -> Result<SheetFormat, SheetError> {
    let extension = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "xlsx" | "xlsm" => Ok(SheetFormat::Xlsx),
        "csv" => Ok(SheetFormat::Csv),
        "numbers" => Ok(SheetFormat::Numbers),
        _ => Err(SheetError::UnknownFormat(name.to_string())),
    }
}

/// Read the token from `variable`. Missing or empty is fatal.
pub fn required_token(variable: &str) -> Result<String, SheetError> {
    std::env::var(variable)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| SheetError::MissingToken(variable.to_string()))
}

/// Download `url`, sending `Authorization: token <token>` when a token is given.
pub async fn download(url: &str, token: Option<&str>) -> Result<Vec<u8>, SheetError> {
    info!("Downloading spreadsheet from {}", url);
    let client = reqwest::Client::new();
    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.header(AUTHORIZATION, format!("token {token}"));
    }
    let response = request.send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Decode spreadsheet bytes of a known format.
pub fn parse_bytes(
    bytes: &[u8],
    format: SheetFormat,
    numbers: &NumbersSettings,
) -> Result<Table, SheetError> {
    match format {
        SheetFormat::Csv => parse_csv(bytes),
        SheetFormat::Xlsx => Table::from_rows(xlsx::read_first_sheet(bytes)?),
        SheetFormat::Numbers => {
            let rows = numbers::read_first_table(bytes)?;
            numbers::reshape(rows, &numbers.drop_rows, numbers.drop_column)
        }
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Table, SheetError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Table::from_rows(rows)
}

/// Load the spreadsheet from a path or URL.
pub async fn load(
    input: &str,
    format: Option<SheetFormat>,
    token: Option<&str>,
    numbers: &NumbersSettings,
) -> Result<Table, SheetError> {
    let source = Source::parse(input);
    let format = match format {
        Some(format) => format,
        None => detect_format(&source.file_name())?,
    };

    let bytes = match &source {
        Source::Url(url) => download(url, token).await?,
        Source::Path(path) => tokio::fs::read(path).await.map_err(|e| SheetError::Io {
            path: path.clone(),
            source: e,
        })?,
    };

    let table = parse_bytes(&bytes, format, numbers)?;
    info!(
        "Loaded {} rows with columns: {}",
        table.rows.len(),
        table.header.join(", ")
    );
    Ok(table)
}
