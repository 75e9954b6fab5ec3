use anyhow::Result;
use scraper::{ElementRef, Selector};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::locate::CandidateTable;
use crate::model::{Cell, RecordSet};
use crate::normalize::flatten_name;
use crate::page::normalized_text;

pub const SHEET_NAME_LIMIT: usize = 31;
const RESERVED_NAME_CHARS: [char; 7] = ['/', '\\', ':', '*', '?', '[', ']'];

#[derive(Debug)]
pub struct ExtractionOutcome {
    pub record_sets: Vec<RecordSet>,
    pub warnings: Vec<String>,
}

/// Turns every candidate table into an owned record set. Tables that cannot
/// be parsed are skipped with a warning; an empty result is an error.
pub fn extract_record_sets(candidates: &[CandidateTable<'_>]) -> Result<ExtractionOutcome> {
    let mut record_sets: Vec<RecordSet> = Vec::new();
    let mut warnings = Vec::new();

    for (position, candidate) in candidates.iter().enumerate() {
        let base_name = candidate
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("table_{}", position + 1));
        let base_name = safe_name(&base_name);

        let Some((columns, rows)) = parse_table_grid(candidate.element) else {
            warn!(table = %base_name, "skipping table with no usable rows or columns");
            warnings.push(format!("skipped table {base_name}: no usable rows or columns"));
            continue;
        };

        let name = unique_name(&base_name, &record_sets);
        info!(table = %name, rows = rows.len(), columns = columns.len(), "extracted table");
        record_sets.push(RecordSet {
            name,
            columns,
            rows,
        });
    }

    if record_sets.is_empty() {
        return Err(PipelineError::NothingExtracted.into());
    }

    Ok(ExtractionOutcome {
        record_sets,
        warnings,
    })
}

/// Replaces characters that are unsafe in worksheet and file names, then
/// truncates to the worksheet name limit.
pub fn safe_name(raw: &str) -> String {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch == ' ' || RESERVED_NAME_CHARS.contains(&ch) {
                '_'
            } else {
                ch
            }
        })
        .collect();
    replaced.chars().take(SHEET_NAME_LIMIT).collect()
}

pub fn flatten_header_parts(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    flatten_name(&joined)
}

fn unique_name(base: &str, existing: &[RecordSet]) -> String {
    let taken = |name: &str| existing.iter().any(|record_set| record_set.name == name);
    if !taken(base) {
        return base.to_string();
    }

    let mut suffix = 1_usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

fn parse_table_grid(table: ElementRef<'_>) -> Option<(Vec<String>, Vec<Vec<Cell>>)> {
    let row_selector = Selector::parse("tr").unwrap();
    let all_rows: Vec<ElementRef<'_>> = table.select(&row_selector).collect();
    let (header_rows, body_rows) = split_rows(&all_rows);

    let header_grid: Vec<Vec<String>> = header_rows
        .iter()
        .map(|row| expanded_cell_texts(*row))
        .collect();
    let column_count = header_grid.iter().map(Vec::len).max().unwrap_or(0);

    let columns: Vec<String> = if column_count == 0 {
        let width = body_rows
            .first()
            .map(|row| row_cells(*row).len())
            .unwrap_or(0);
        (0..width).map(|position| position.to_string()).collect()
    } else {
        (0..column_count)
            .map(|position| {
                let parts: Vec<&str> = header_grid
                    .iter()
                    .filter_map(|row| row.get(position))
                    .map(String::as_str)
                    .collect();
                flatten_header_parts(&parts)
            })
            .collect()
    };

    if columns.is_empty() {
        return None;
    }

    let rows = body_rows
        .iter()
        .map(|row| {
            let mut cells: Vec<Cell> = row_cells(*row)
                .into_iter()
                .map(|cell| Cell::Text(normalized_text(cell)))
                .collect();
            cells.resize(columns.len(), Cell::Text(String::new()));
            cells
        })
        .collect();

    Some((columns, rows))
}

fn split_rows<'a>(
    all_rows: &[ElementRef<'a>],
) -> (Vec<ElementRef<'a>>, Vec<ElementRef<'a>>) {
    let mut header_rows = Vec::new();
    let mut body_rows = Vec::new();

    for row in all_rows {
        if inside_thead(*row) {
            header_rows.push(*row);
        } else {
            body_rows.push(*row);
        }
    }

    if header_rows.is_empty() {
        let leading = body_rows
            .iter()
            .take_while(|row| row_is_all_header_cells(**row))
            .count();
        header_rows = body_rows.drain(..leading).collect();
    }

    (header_rows, body_rows)
}

fn inside_thead(row: ElementRef<'_>) -> bool {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "thead")
}

fn row_is_all_header_cells(row: ElementRef<'_>) -> bool {
    let cells = row_cells(row);
    !cells.is_empty() && cells.iter().all(|cell| cell.value().name() == "th")
}

fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|element| {
            let name = element.value().name();
            name == "th" || name == "td"
        })
        .collect()
}

fn expanded_cell_texts(row: ElementRef<'_>) -> Vec<String> {
    let mut texts = Vec::new();
    for cell in row_cells(row) {
        let span = cell
            .value()
            .attr("colspan")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let text = normalized_text(cell);
        for _ in 0..span {
            texts.push(text.clone());
        }
    }
    texts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::TableSource;
    use crate::page::{PageDocument, table_id};

    fn candidates_from<'a>(page: &'a PageDocument) -> Vec<CandidateTable<'a>> {
        page.main_tables()
            .into_iter()
            .enumerate()
            .map(|(index, element)| CandidateTable {
                id: table_id(element).map(ToOwned::to_owned),
                headers: Vec::new(),
                element,
                source: TableSource::Main,
                index,
            })
            .collect()
    }

    fn text_row(record_set: &RecordSet, row: usize) -> Vec<String> {
        record_set.rows[row].iter().map(Cell::render).collect()
    }

    #[test]
    fn joins_stacked_header_rows_with_colspan_expansion() {
        let page = PageDocument::parse(
            "<table id=\"stats_squads\"><thead>\
             <tr><th></th><th colspan=\"2\">Standard</th></tr>\
             <tr><th>Squad</th><th>Goals</th><th>Assists</th></tr>\
             </thead><tbody>\
             <tr><th>Arsenal</th><td>91</td><td>62</td></tr>\
             </tbody></table>",
        );
        let candidates = candidates_from(&page);

        let outcome = extract_record_sets(&candidates).unwrap();

        let record_set = &outcome.record_sets[0];
        assert_eq!(record_set.name, "stats_squads");
        assert_eq!(
            record_set.columns,
            vec!["squad", "standard_goals", "standard_assists"]
        );
        assert_eq!(text_row(record_set, 0), vec!["Arsenal", "91", "62"]);
    }

    #[test]
    fn treats_leading_all_th_rows_as_headers_when_thead_is_missing() {
        let page = PageDocument::parse(
            "<table><tr><th>Squad</th><th>MP</th></tr>\
             <tr><td>Chelsea</td><td>38</td></tr></table>",
        );
        let candidates = candidates_from(&page);

        let outcome = extract_record_sets(&candidates).unwrap();

        let record_set = &outcome.record_sets[0];
        assert_eq!(record_set.columns, vec!["squad", "mp"]);
        assert_eq!(record_set.rows.len(), 1);
    }

    #[test]
    fn names_columns_positionally_when_no_header_exists() {
        let page = PageDocument::parse(
            "<table><tr><td>Everton</td><td>39</td></tr><tr><td>Fulham</td><td>54</td></tr></table>",
        );
        let candidates = candidates_from(&page);

        let outcome = extract_record_sets(&candidates).unwrap();

        let record_set = &outcome.record_sets[0];
        assert_eq!(record_set.columns, vec!["0", "1"]);
        assert_eq!(text_row(record_set, 1), vec!["Fulham", "54"]);
    }

    #[test]
    fn pads_and_truncates_ragged_body_rows() {
        let page = PageDocument::parse(
            "<table><thead><tr><th>Squad</th><th>MP</th></tr></thead><tbody>\
             <tr><td>Villa</td></tr>\
             <tr><td>Spurs</td><td>38</td><td>extra</td></tr>\
             </tbody></table>",
        );
        let candidates = candidates_from(&page);

        let outcome = extract_record_sets(&candidates).unwrap();

        let record_set = &outcome.record_sets[0];
        assert_eq!(text_row(record_set, 0), vec!["Villa", ""]);
        assert_eq!(text_row(record_set, 1), vec!["Spurs", "38"]);
    }

    #[test]
    fn falls_back_to_positional_names_for_tables_without_ids() {
        let page = PageDocument::parse(
            "<table><tr><th>A</th></tr><tr><td>1</td></tr></table>\
             <table><tr><th>B</th></tr><tr><td>2</td></tr></table>",
        );
        let candidates = candidates_from(&page);

        let outcome = extract_record_sets(&candidates).unwrap();

        let names: Vec<&str> = outcome
            .record_sets
            .iter()
            .map(|record_set| record_set.name.as_str())
            .collect();
        assert_eq!(names, vec!["table_1", "table_2"]);
    }

    #[test]
    fn suffixes_duplicate_table_names() {
        let page = PageDocument::parse(
            "<table id=\"stats_squads\"><tr><th>A</th></tr><tr><td>1</td></tr></table>\
             <table id=\"stats_squads\"><tr><th>B</th></tr><tr><td>2</td></tr></table>\
             <table id=\"stats_squads\"><tr><th>C</th></tr><tr><td>3</td></tr></table>",
        );
        let candidates = candidates_from(&page);

        let outcome = extract_record_sets(&candidates).unwrap();

        let names: Vec<&str> = outcome
            .record_sets
            .iter()
            .map(|record_set| record_set.name.as_str())
            .collect();
        assert_eq!(names, vec!["stats_squads", "stats_squads_1", "stats_squads_2"]);
    }

    #[test]
    fn sanitizes_and_truncates_table_names() {
        assert_eq!(safe_name("stats/squads: per 90"), "stats_squads__per_90");
        assert_eq!(safe_name("x".repeat(40).as_str()), "x".repeat(31));
        assert_eq!(safe_name("shots[on]target?"), "shots_on_target_");
    }

    #[test]
    fn skips_unparseable_tables_but_keeps_the_rest() {
        let page = PageDocument::parse(
            "<table id=\"empty_stats\"></table>\
             <table id=\"stats_squads\"><tr><th>Squad</th></tr><tr><td>Brentford</td></tr></table>",
        );
        let candidates = candidates_from(&page);

        let outcome = extract_record_sets(&candidates).unwrap();

        assert_eq!(outcome.record_sets.len(), 1);
        assert_eq!(outcome.record_sets[0].name, "stats_squads");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("empty_stats"));
    }

    #[test]
    fn reports_an_error_when_nothing_can_be_extracted() {
        let page = PageDocument::parse("<table id=\"empty_stats\"></table>");
        let candidates = candidates_from(&page);

        let error = extract_record_sets(&candidates).unwrap_err();

        assert!(matches!(
            error.downcast_ref::<PipelineError>(),
            Some(PipelineError::NothingExtracted)
        ));
    }

    #[test]
    fn flattens_header_parts() {
        assert_eq!(flatten_header_parts(&["Standard", "Goals"]), "standard_goals");
        assert_eq!(flatten_header_parts(&["", "x"]), "x");
        assert_eq!(flatten_header_parts(&[" Club "]), "club");
        assert_eq!(flatten_header_parts(&[]), "");
    }
}
