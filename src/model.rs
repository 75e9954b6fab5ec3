use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Missing,
}

impl Cell {
    pub fn render(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Number(value) => format!("{value}"),
            Self::Missing => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchManifest {
    pub manifest_version: u32,
    pub source_url: String,
    pub fetched_at: String,
    pub transport: String,
    pub markup_sha256: String,
    pub markup_bytes: usize,
    pub table_names: Vec<String>,
    pub csv_files: Vec<String>,
    pub workbook_path: Option<String>,
    pub warnings: Vec<String>,
}
