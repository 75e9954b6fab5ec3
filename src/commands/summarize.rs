use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::SummarizeArgs;
use crate::export::CSV_PREFIX;

const SUMMARY_FILENAME: &str = "table_summary.csv";
const SAMPLE_HEADER_COUNT: usize = 8;

pub fn run(args: SummarizeArgs) -> Result<()> {
    let summary_path = args
        .summary_path
        .unwrap_or_else(|| args.raw_dir.join(SUMMARY_FILENAME));

    let table_files = discover_table_csvs(&args.raw_dir)?;
    if table_files.is_empty() {
        bail!(
            "no {CSV_PREFIX}*.csv files in {} (run `fetch` first)",
            args.raw_dir.display()
        );
    }

    let mut writer = csv::Writer::from_path(&summary_path)
        .with_context(|| format!("failed to create {}", summary_path.display()))?;
    writer.write_record(["table_name", "file_name", "rows", "cols", "sample_headers"])?;

    for path in &table_files {
        writer.write_record(summarize_file(path))?;
    }
    writer.flush()?;

    info!(
        path = %summary_path.display(),
        tables = table_files.len(),
        "wrote table summary"
    );
    Ok(())
}

pub fn discover_table_csvs(raw_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(raw_dir)
        .with_context(|| format!("failed to read {}", raw_dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", raw_dir.display()))?
            .path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if file_name.starts_with(CSV_PREFIX) && file_name.ends_with(".csv") {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

pub fn table_name_from_file(file_name: &str) -> &str {
    file_name
        .strip_prefix(CSV_PREFIX)
        .unwrap_or(file_name)
        .strip_suffix(".csv")
        .unwrap_or(file_name)
}

/// One summary row per CSV. A file that fails to read becomes an error row
/// so a single bad file cannot sink the whole summary.
fn summarize_file(path: &Path) -> [String; 5] {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();
    let table_name = table_name_from_file(&file_name).to_string();

    match read_shape(path) {
        Ok((rows, headers)) => {
            let sample = headers
                .iter()
                .take(SAMPLE_HEADER_COUNT)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(";");
            [
                table_name,
                file_name,
                rows.to_string(),
                headers.len().to_string(),
                sample,
            ]
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to summarize csv");
            [
                table_name,
                file_name,
                "error".to_string(),
                "error".to_string(),
                format!("unreadable: {error}"),
            ]
        }
    }
}

fn read_shape(path: &Path) -> Result<(usize, Vec<String>)> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read headers of {}", path.display()))?
        .iter()
        .map(ToOwned::to_owned)
        .collect();

    let mut rows = 0_usize;
    for record in reader.records() {
        record.with_context(|| format!("failed to read row of {}", path.display()))?;
        rows += 1;
    }

    Ok((rows, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_table_csv(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(format!("{CSV_PREFIX}{name}.csv")), contents).unwrap();
    }

    #[test]
    fn summarizes_every_table_csv_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write_table_csv(dir.path(), "stats_standard", "squad,mp,goals\nArsenal,38,91\nChelsea,38,77\n");
        write_table_csv(dir.path(), "div_squads_shooting", "squad,sh\nArsenal,601\n");
        fs::write(dir.path().join("notes.csv"), "unrelated\n").unwrap();

        run(SummarizeArgs {
            raw_dir: dir.path().to_path_buf(),
            summary_path: None,
        })
        .unwrap();

        let summary = fs::read_to_string(dir.path().join(SUMMARY_FILENAME)).unwrap();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "table_name,file_name,rows,cols,sample_headers");
        assert_eq!(
            lines[1],
            "div_squads_shooting,premier_league_div_squads_shooting.csv,1,2,squad;sh"
        );
        assert_eq!(
            lines[2],
            "stats_standard,premier_league_stats_standard.csv,2,3,squad;mp;goals"
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_raw_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let error = run(SummarizeArgs {
            raw_dir: dir.path().to_path_buf(),
            summary_path: None,
        })
        .unwrap_err();

        assert!(error.to_string().contains("run `fetch` first"));
    }

    #[test]
    fn unreadable_file_becomes_an_error_row() {
        let dir = tempfile::tempdir().unwrap();
        write_table_csv(dir.path(), "stats_standard", "squad,mp\nArsenal,38\n");
        // A directory with a table-like name cannot be opened as a CSV.
        fs::create_dir(dir.path().join(format!("{CSV_PREFIX}broken.csv"))).unwrap();

        run(SummarizeArgs {
            raw_dir: dir.path().to_path_buf(),
            summary_path: None,
        })
        .unwrap();

        let summary = fs::read_to_string(dir.path().join(SUMMARY_FILENAME)).unwrap();
        assert!(summary.contains("broken"));
        assert!(summary.contains("error"));
        assert!(summary.contains("stats_standard,premier_league_stats_standard.csv,1,2"));
    }

    #[test]
    fn strips_prefix_and_extension_from_table_names() {
        assert_eq!(
            table_name_from_file("premier_league_stats_standard.csv"),
            "stats_standard"
        );
        assert_eq!(table_name_from_file("other.txt"), "other.txt");
    }

    #[test]
    fn headers_are_capped_in_the_sample_column() {
        let dir = tempfile::tempdir().unwrap();
        write_table_csv(
            dir.path(),
            "wide",
            "a,b,c,d,e,f,g,h,i,j\n1,2,3,4,5,6,7,8,9,10\n",
        );

        run(SummarizeArgs {
            raw_dir: dir.path().to_path_buf(),
            summary_path: None,
        })
        .unwrap();

        let summary = fs::read_to_string(dir.path().join(SUMMARY_FILENAME)).unwrap();
        assert!(summary.contains("wide,premier_league_wide.csv,1,10,a;b;c;d;e;f;g;h"));
    }
}
