use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::FetchArgs;
use crate::error::PipelineError;
use crate::export;
use crate::extract::extract_record_sets;
use crate::locate::locate_tables;
use crate::model::{FetchManifest, RecordSet};
use crate::net::{FetchedPage, Transport, fetch_page};
use crate::normalize::{
    ColumnMappings, DEFAULT_MAPPINGS_PATH, canonicalize_headers, normalize_types,
};
use crate::page::PageDocument;
use crate::util::{now_utc_string, sha256_hex, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;
const MANIFEST_FILENAME: &str = "fetch_manifest.json";


pub fn run(args: FetchArgs) -> Result<()> {
    let fetched = fetch_page(&args.url, args.attempts, args.use_browser)?;
    info!(
        url = %args.url,
        transport = fetched.transport.as_str(),
        bytes = fetched.markup.len(),
        "fetched page"
    );

    let mappings_path = args
        .mappings_path
        .clone()
        .unwrap_or_else(|| Path::new(DEFAULT_MAPPINGS_PATH).to_path_buf());
    let mappings = ColumnMappings::load(&mappings_path)?;

    let outcome = process_markup(&fetched, args.tables.as_deref(), &mappings)?;
    write_outputs(&args.out_dir, &args.url, outcome)
}

#[derive(Debug)]
struct PipelineOutcome {
    record_sets: Vec<RecordSet>,
    transport: Transport,
    markup_sha256: String,
    markup_bytes: usize,
    warnings: Vec<String>,
}

/// The pure half of the fetch command: markup in, normalized record sets
/// out. Split from `run` so the pipeline is testable without a network.
fn process_markup(
    fetched: &FetchedPage,
    table_filter: Option<&str>,
    mappings: &ColumnMappings,
) -> Result<PipelineOutcome> {
    let page = PageDocument::parse(&fetched.markup);
    let candidates = locate_tables(&page)?;
    let extracted = extract_record_sets(&candidates)?;
    let mut warnings = extracted.warnings;

    let retained = apply_table_filter(extracted.record_sets, table_filter)?;

    let record_sets: Vec<RecordSet> = retained
        .iter()
        .map(|record_set| normalize_types(&canonicalize_headers(record_set, mappings)))
        .collect();

    for record_set in &record_sets {
        info!(
            table = %record_set.name,
            rows = record_set.rows.len(),
            columns = record_set.columns.len(),
            "normalized table"
        );
    }

    Ok(PipelineOutcome {
        record_sets,
        transport: fetched.transport,
        markup_sha256: sha256_hex(fetched.markup.as_bytes()),
        markup_bytes: fetched.markup.len(),
        warnings,
    })
}

/// Keeps only record sets whose name contains one of the comma-separated
/// substrings, case-insensitively. An empty survivor list is fatal so a typo
/// in the filter does not silently produce an empty run.
fn apply_table_filter(record_sets: Vec<RecordSet>, filter: Option<&str>) -> Result<Vec<RecordSet>> {
    let Some(filter) = filter.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(record_sets);
    };

    let needles: Vec<String> = filter
        .split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect();

    let extracted = record_sets.len();
    let retained: Vec<RecordSet> = record_sets
        .into_iter()
        .filter(|record_set| {
            let name = record_set.name.to_lowercase();
            needles.iter().any(|needle| name.contains(needle))
        })
        .collect();

    if retained.is_empty() {
        return Err(PipelineError::FilterMatchedNothing {
            filter: filter.to_string(),
            extracted,
        }
        .into());
    }

    info!(retained = retained.len(), extracted, filter = %filter, "applied table filter");
    Ok(retained)
}

fn write_outputs(out_dir: &Path, url: &str, outcome: PipelineOutcome) -> Result<()> {
    let fetched_at = now_utc_string();
    let mut warnings = outcome.warnings;

    let csv_files = export::write_csv_files(out_dir, &outcome.record_sets)?;

    // A workbook failure must not discard the CSVs that are already on disk.
    let workbook_path = match export::write_workbook(out_dir, url, &fetched_at, &outcome.record_sets)
    {
        Ok(path) => Some(path.display().to_string()),
        Err(error) => {
            warn!(error = %error, "workbook write failed, keeping csv outputs");
            warnings.push(format!("workbook write failed: {error}"));
            None
        }
    };

    let manifest = FetchManifest {
        manifest_version: MANIFEST_VERSION,
        source_url: url.to_string(),
        fetched_at,
        transport: outcome.transport.as_str().to_string(),
        markup_sha256: outcome.markup_sha256,
        markup_bytes: outcome.markup_bytes,
        table_names: outcome
            .record_sets
            .iter()
            .map(|record_set| record_set.name.clone())
            .collect(),
        csv_files,
        workbook_path,
        warnings,
    };

    let manifest_path = out_dir.join(MANIFEST_FILENAME);
    write_json_pretty(&manifest_path, &manifest)?;
    info!(
        path = %manifest_path.display(),
        tables = manifest.table_names.len(),
        "fetch completed"
    );

    Ok(())
}
