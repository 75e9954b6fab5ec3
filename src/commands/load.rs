use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};
use tracing::info;

use crate::cli::LoadArgs;
use crate::commands::summarize::{discover_table_csvs, table_name_from_file};
use crate::util::{ensure_directory, now_utc_string};

const FACT_STAT_COLUMNS: [&str; 6] = [
    "matches_played",
    "goals",
    "xg",
    "xa",
    "npxg",
    "possession_pct",
];

pub fn run(args: LoadArgs) -> Result<()> {
    let table_files = discover_table_csvs(&args.raw_dir)?;
    if table_files.is_empty() {
        bail!(
            "no table CSVs in {} (run `fetch` first)",
            args.raw_dir.display()
        );
    }

    if let Some(parent) = args.db_path.parent() {
        ensure_directory(parent)?;
    }
    let mut connection = Connection::open(&args.db_path)
        .with_context(|| format!("failed to open database: {}", args.db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;

    // Fact rows come from the first staged table that carries a squad column
    // alongside at least one canonical stat column; a squad-only table is
    // kept as a fallback source.
    let mut fact_source: Option<(CsvTable, bool)> = None;
    for path in &table_files {
        let table = CsvTable::read(path)?;
        let staged = stage_table(&mut connection, &table, args.truncate_staging)?;
        info!(
            staging_table = %table.staging_name,
            rows = staged,
            "loaded staging table"
        );

        if table.column_index("squad").is_some() {
            let has_stats = FACT_STAT_COLUMNS
                .iter()
                .any(|column| table.column_index(column).is_some());
            let upgrade = match &fact_source {
                None => true,
                Some((_, existing_has_stats)) => has_stats && !existing_has_stats,
            };
            if upgrade {
                fact_source = Some((table, has_stats));
            }
        }
    }

    match fact_source {
        Some((table, _)) => {
            let upserted = upsert_fact_rows(&mut connection, &table, &args.season)?;
            info!(
                season = %args.season,
                rows = upserted,
                source = %table.staging_name,
                "upserted team season facts"
            );
        }
        None => info!("no staged table has a squad column, skipping fact upsert"),
    }

    info!(path = %args.db_path.display(), files = table_files.len(), "load completed");
    Ok(())
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS fact_team_season_stats (
              squad TEXT NOT NULL,
              season TEXT NOT NULL,
              matches_played REAL,
              goals REAL,
              xg REAL,
              xa REAL,
              npxg REAL,
              possession_pct REAL,
              loaded_at TEXT NOT NULL,
              PRIMARY KEY (squad, season)
            );
            ",
        )
        .context("failed to create fact table")
}

/// One raw CSV, held in memory for staging and the fact upsert. Column names
/// are de-duplicated with numeric suffixes so they are usable as SQL columns.
struct CsvTable {
    staging_name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    fn read(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("invalid file name: {}", path.display()))?;
        let staging_name = format!("stage_{}", sanitize_sql_token(table_name_from_file(file_name)));

        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("failed to read headers of {}", path.display()))?
            .iter()
            .map(sanitize_sql_token)
            .collect();
        let columns = dedupe_columns(headers);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("failed to read row of {}", path.display()))?;
            let mut row: Vec<String> = record.iter().map(ToOwned::to_owned).collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        if columns.is_empty() {
            bail!("{} has no header columns", path.display());
        }

        Ok(Self {
            staging_name,
            columns,
            rows,
        })
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

fn sanitize_sql_token(raw: &str) -> String {
    let token: String = raw
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if token.is_empty() {
        "unnamed".to_string()
    } else {
        token
    }
}

fn dedupe_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(columns.len());
    for column in columns {
        if !seen.contains(&column) {
            seen.push(column);
            continue;
        }
        let mut suffix = 2_usize;
        loop {
            let candidate = format!("{column}_{suffix}");
            if !seen.contains(&candidate) {
                seen.push(candidate);
                break;
            }
            suffix += 1;
        }
    }
    seen
}

fn stage_table(connection: &mut Connection, table: &CsvTable, truncate: bool) -> Result<usize> {
    let column_defs = table
        .columns
        .iter()
        .map(|column| format!("\"{column}\" TEXT"))
        .collect::<Vec<_>>()
        .join(", ");
    connection
        .execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({column_defs});",
            table.staging_name
        ))
        .with_context(|| format!("failed to create staging table {}", table.staging_name))?;

    let transaction = connection
        .transaction()
        .context("failed to begin staging transaction")?;

    if truncate {
        transaction
            .execute(&format!("DELETE FROM \"{}\"", table.staging_name), [])
            .with_context(|| format!("failed to truncate {}", table.staging_name))?;
    }

    let placeholders = (1..=table.columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let column_list = table
        .columns
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_sql = format!(
        "INSERT INTO \"{}\" ({column_list}) VALUES ({placeholders})",
        table.staging_name
    );

    {
        let mut statement = transaction
            .prepare(&insert_sql)
            .with_context(|| format!("failed to prepare insert for {}", table.staging_name))?;
        for row in &table.rows {
            statement
                .execute(rusqlite::params_from_iter(row.iter()))
                .with_context(|| format!("failed to insert into {}", table.staging_name))?;
        }
    }

    transaction
        .commit()
        .with_context(|| format!("failed to commit staging table {}", table.staging_name))?;
    Ok(table.rows.len())
}

fn upsert_fact_rows(connection: &mut Connection, table: &CsvTable, season: &str) -> Result<usize> {
    let squad_index = table
        .column_index("squad")
        .context("fact source table lost its squad column")?;
    let stat_indexes: Vec<Option<usize>> = FACT_STAT_COLUMNS
        .iter()
        .map(|column| table.column_index(column))
        .collect();
    let loaded_at = now_utc_string();

    let transaction = connection
        .transaction()
        .context("failed to begin fact transaction")?;
    let mut upserted = 0_usize;

    {
        let mut statement = transaction
            .prepare(
                "
                INSERT INTO fact_team_season_stats
                  (squad, season, matches_played, goals, xg, xa, npxg, possession_pct, loaded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(squad, season) DO UPDATE SET
                  matches_played = excluded.matches_played,
                  goals = excluded.goals,
                  xg = excluded.xg,
                  xa = excluded.xa,
                  npxg = excluded.npxg,
                  possession_pct = excluded.possession_pct,
                  loaded_at = excluded.loaded_at
                ",
            )
            .context("failed to prepare fact upsert")?;

        for row in &table.rows {
            let squad = row[squad_index].trim();
            if squad.is_empty() {
                continue;
            }
            let stats: Vec<Option<f64>> = stat_indexes
                .iter()
                .map(|index| {
                    index
                        .and_then(|position| row.get(position))
                        .and_then(|value| value.trim().parse::<f64>().ok())
                })
                .collect();
            statement
                .execute(params![
                    squad, season, stats[0], stats[1], stats[2], stats[3], stats[4], stats[5],
                    loaded_at,
                ])
                .context("failed to upsert fact row")?;
            upserted += 1;
        }
    }

    transaction.commit().context("failed to commit fact rows")?;
    Ok(upserted)
}
