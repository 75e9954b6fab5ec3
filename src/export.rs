use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quick_xml::escape::escape;
use tracing::info;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::extract::safe_name;
use crate::model::{Cell, RecordSet};
use crate::util::ensure_directory;

pub const CSV_PREFIX: &str = "premier_league_";
pub const WORKBOOK_FILENAME: &str = "premier_league_team_stats.xlsx";

/// Writes one CSV per record set into `out_dir` and returns the file names.
pub fn write_csv_files(out_dir: &Path, record_sets: &[RecordSet]) -> Result<Vec<String>> {
    ensure_directory(out_dir)?;

    let mut written = Vec::with_capacity(record_sets.len());
    for record_set in record_sets {
        let file_name = format!("{CSV_PREFIX}{}.csv", record_set.name);
        let path = out_dir.join(&file_name);
        write_csv(&path, record_set)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), rows = record_set.rows.len(), "wrote table csv");
        written.push(file_name);
    }

    Ok(written)
}

fn write_csv(path: &Path, record_set: &RecordSet) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&record_set.columns)?;
    for row in &record_set.rows {
        writer.write_record(row.iter().map(Cell::render))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the consolidated workbook: a metadata sheet first, then one sheet
/// per record set. The package is minimal SpreadsheetML with inline strings,
/// which every spreadsheet reader accepts.
pub fn write_workbook(
    out_dir: &Path,
    source_url: &str,
    fetched_at: &str,
    record_sets: &[RecordSet],
) -> Result<PathBuf> {
    ensure_directory(out_dir)?;
    let path = out_dir.join(WORKBOOK_FILENAME);

    let metadata = metadata_sheet(source_url, fetched_at, record_sets);
    let mut sheets: Vec<(String, String)> = vec![("metadata".to_string(), metadata)];
    for record_set in record_sets {
        sheets.push((safe_name(&record_set.name), sheet_xml(record_set)));
    }

    let file = File::create(&path)
        .with_context(|| format!("failed to create workbook: {}", path.display()))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    add_entry(
        &mut archive,
        options,
        "[Content_Types].xml",
        &content_types_xml(sheets.len()),
    )?;
    add_entry(&mut archive, options, "_rels/.rels", PACKAGE_RELS)?;
    add_entry(&mut archive, options, "xl/workbook.xml", &workbook_xml(&sheets))?;
    add_entry(
        &mut archive,
        options,
        "xl/_rels/workbook.xml.rels",
        &workbook_rels_xml(sheets.len()),
    )?;
    for (index, (_, body)) in sheets.iter().enumerate() {
        add_entry(
            &mut archive,
            options,
            &format!("xl/worksheets/sheet{}.xml", index + 1),
            body,
        )?;
    }

    archive.finish().context("failed to finalize workbook")?;
    info!(path = %path.display(), sheets = sheets.len(), "wrote workbook");
    Ok(path)
}

fn add_entry(
    archive: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    name: &str,
    body: &str,
) -> Result<()> {
    archive
        .start_file(name, options)
        .with_context(|| format!("failed to start workbook entry {name}"))?;
    archive
        .write_all(body.as_bytes())
        .with_context(|| format!("failed to write workbook entry {name}"))?;
    Ok(())
}

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

fn content_types_xml(sheet_count: usize) -> String {
    let mut overrides = String::new();
    for index in 1..=sheet_count {
        overrides.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{index}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>{overrides}</Types>"#
    )
}

fn workbook_xml(sheets: &[(String, String)]) -> String {
    let mut entries = String::new();
    for (index, (name, _)) in sheets.iter().enumerate() {
        entries.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(name.as_str()),
            index + 1,
            index + 1
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{entries}</sheets></workbook>"#
    )
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut entries = String::new();
    for index in 1..=sheet_count {
        entries.push_str(&format!(
            r#"<Relationship Id="rId{index}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{index}.xml"/>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{entries}</Relationships>"#
    )
}

fn metadata_sheet(source_url: &str, fetched_at: &str, record_sets: &[RecordSet]) -> String {
    let table_names = record_sets
        .iter()
        .map(|record_set| record_set.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let rows: Vec<Vec<Cell>> = vec![
        text_row(&["source", source_url]),
        text_row(&["fetched_at", fetched_at]),
        text_row(&["tables", &table_names]),
    ];
    rows_to_sheet_xml(&[Cell::Text("key".into()), Cell::Text("value".into())], &rows)
}

fn text_row(values: &[&str]) -> Vec<Cell> {
    values
        .iter()
        .map(|value| Cell::Text((*value).to_string()))
        .collect()
}

fn sheet_xml(record_set: &RecordSet) -> String {
    let header: Vec<Cell> = record_set
        .columns
        .iter()
        .map(|column| Cell::Text(column.clone()))
        .collect();
    rows_to_sheet_xml(&header, &record_set.rows)
}

fn rows_to_sheet_xml(header: &[Cell], rows: &[Vec<Cell>]) -> String {
    let mut body = String::new();
    body.push_str(&row_xml(1, header));
    for (index, row) in rows.iter().enumerate() {
        body.push_str(&row_xml(index + 2, row));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{body}</sheetData></worksheet>"#
    )
}

fn row_xml(row_number: usize, cells: &[Cell]) -> String {
    let mut xml = format!(r#"<row r="{row_number}">"#);
    for cell in cells {
        match cell {
            Cell::Text(text) => {
                xml.push_str(&format!(
                    r#"<c t="inlineStr"><is><t>{}</t></is></c>"#,
                    escape(text.as_str())
                ));
            }
            Cell::Number(number) => {
                xml.push_str(&format!(r#"<c t="n"><v>{number}</v></c>"#));
            }
            Cell::Missing => xml.push_str("<c/>"),
        }
    }
    xml.push_str("</row>");
    xml
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    fn sample_record_sets() -> Vec<RecordSet> {
        vec![RecordSet {
            name: "stats_squads".to_string(),
            columns: vec!["squad".to_string(), "xg".to_string()],
            rows: vec![
                vec![Cell::Text("Arsenal & Co".to_string()), Cell::Number(1.5)],
                vec![Cell::Text("Leeds".to_string()), Cell::Missing],
            ],
        }]
    }

    #[test]
    fn writes_one_csv_per_record_set() {
        let dir = tempfile::tempdir().unwrap();

        let written = write_csv_files(dir.path(), &sample_record_sets()).unwrap();

        assert_eq!(written, vec!["premier_league_stats_squads.csv"]);
        let contents = std::fs::read_to_string(dir.path().join(&written[0])).unwrap();
        assert!(contents.starts_with("squad,xg\n"));
        assert!(contents.contains("Arsenal & Co,1.5"));
        assert!(contents.contains("Leeds,\n"));
    }

    #[test]
    fn workbook_contains_metadata_and_table_sheets() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_workbook(
            dir.path(),
            "https://example.test/stats",
            "2025-08-01T00:00:00Z",
            &sample_record_sets(),
        )
        .unwrap();

        let file = File::open(&path).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();

        let mut workbook = String::new();
        archive
            .by_name("xl/workbook.xml")
            .unwrap()
            .read_to_string(&mut workbook)
            .unwrap();
        assert!(workbook.contains(r#"name="metadata""#));
        assert!(workbook.contains(r#"name="stats_squads""#));

        let mut metadata = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut metadata)
            .unwrap();
        assert!(metadata.contains("https://example.test/stats"));
        assert!(metadata.contains("2025-08-01T00:00:00Z"));

        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet2.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        assert!(sheet.contains("Arsenal &amp; Co"));
        assert!(sheet.contains("<v>1.5</v>"));
    }
}
