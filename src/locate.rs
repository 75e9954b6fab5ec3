use anyhow::Result;
use scraper::ElementRef;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::page::{PageDocument, table_header_texts, table_id};

pub const EXACT_TABLE_IDS: [&str; 2] = ["stats_standard", "all_stats_standard"];
pub const ID_KEYWORD: &str = "stats";
pub const HEADER_KEYWORDS: [&str; 3] = ["club", "squad", "team"];
pub const SWEEP_ID_KEYWORDS: [&str; 3] = ["stats", "squad", "standard"];
pub const SWEEP_HEADER_KEYWORDS: [&str; 4] = ["club", "squad", "team", "standard"];
pub const ID_COMMENT_SCAN_LIMIT: usize = 50;
pub const HEADER_COMMENT_SCAN_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSource {
    Main,
    Comment(usize),
}

/// A table picked out of the page, still borrowing the parsed document.
#[derive(Debug)]
pub struct CandidateTable<'a> {
    pub element: ElementRef<'a>,
    pub source: TableSource,
    pub index: usize,
    pub id: Option<String>,
    pub headers: Vec<String>,
}

impl<'a> CandidateTable<'a> {
    fn new(element: ElementRef<'a>, source: TableSource, index: usize) -> Self {
        Self {
            id: table_id(element).map(ToOwned::to_owned),
            headers: table_header_texts(element),
            element,
            source,
            index,
        }
    }

    fn identity(&self) -> (TableSource, usize) {
        (self.source, self.index)
    }
}

/// Finds the primary stats table through a cascade of match strategies, then
/// sweeps the rest of the page for further stats-like tables. The primary
/// table always comes first in the returned list.
pub fn locate_tables<'a>(page: &'a PageDocument) -> Result<Vec<CandidateTable<'a>>> {
    let main_tables = page.main_tables();
    info!(
        main_tables = main_tables.len(),
        comments = page.comment_count(),
        "searching page for stats tables"
    );

    let primary = find_primary(page, &main_tables).ok_or(PipelineError::TableUnresolved {
        main_tables: main_tables.len(),
        comments_scanned: page.comment_count(),
    })?;

    let mut located = vec![primary];
    sweep_main_tables(&main_tables, &mut located);
    sweep_comment_tables(page, &mut located);

    info!(candidates = located.len(), "collected candidate tables");
    Ok(located)
}

fn find_primary<'a>(
    page: &'a PageDocument,
    main_tables: &[ElementRef<'a>],
) -> Option<CandidateTable<'a>> {
    find_exact_id(main_tables)
        .or_else(|| find_id_keyword_in_main(main_tables))
        .or_else(|| find_id_keyword_in_comments(page))
        .or_else(|| find_header_keywords_in_comments(page))
}

fn find_exact_id<'a>(main_tables: &[ElementRef<'a>]) -> Option<CandidateTable<'a>> {
    for known_id in EXACT_TABLE_IDS {
        for (index, table) in main_tables.iter().enumerate() {
            if table_id(*table) == Some(known_id) {
                debug!(id = known_id, "matched table by exact id");
                return Some(CandidateTable::new(*table, TableSource::Main, index));
            }
        }
    }
    None
}

fn find_id_keyword_in_main<'a>(main_tables: &[ElementRef<'a>]) -> Option<CandidateTable<'a>> {
    for (index, table) in main_tables.iter().enumerate() {
        let id = table_id(*table).unwrap_or_default();
        if id.contains(ID_KEYWORD) {
            debug!(id = id, "matched main-document table by id keyword");
            return Some(CandidateTable::new(*table, TableSource::Main, index));
        }
    }
    None
}

fn find_id_keyword_in_comments(page: &PageDocument) -> Option<CandidateTable<'_>> {
    for comment_index in 0..page.comment_count().min(ID_COMMENT_SCAN_LIMIT) {
        if !page.comment_mentions_table(comment_index) {
            continue;
        }

        for (index, table) in page.comment_tables(comment_index).into_iter().enumerate() {
            let id = table_id(table).unwrap_or_default();
            if id.contains(ID_KEYWORD) {
                debug!(
                    id = id,
                    comment = comment_index,
                    "matched commented-out table by id keyword"
                );
                return Some(CandidateTable::new(
                    table,
                    TableSource::Comment(comment_index),
                    index,
                ));
            }
        }
    }
    None
}

fn find_header_keywords_in_comments(page: &PageDocument) -> Option<CandidateTable<'_>> {
    for comment_index in 0..page.comment_count().min(HEADER_COMMENT_SCAN_LIMIT) {
        if !page.comment_mentions_table(comment_index) {
            continue;
        }

        for (index, table) in page.comment_tables(comment_index).into_iter().enumerate() {
            let candidate = CandidateTable::new(table, TableSource::Comment(comment_index), index);
            if headers_match(&candidate.headers, &HEADER_KEYWORDS) {
                debug!(
                    comment = comment_index,
                    "matched commented-out table by header keywords"
                );
                return Some(candidate);
            }
        }
    }
    None
}

fn sweep_main_tables<'a>(main_tables: &[ElementRef<'a>], located: &mut Vec<CandidateTable<'a>>) {
    for (index, table) in main_tables.iter().enumerate() {
        let id_lower = table_id(*table).unwrap_or_default().to_ascii_lowercase();
        if SWEEP_ID_KEYWORDS
            .iter()
            .any(|keyword| id_lower.contains(keyword))
        {
            push_unique(
                located,
                CandidateTable::new(*table, TableSource::Main, index),
            );
        }
    }
}

fn sweep_comment_tables<'a>(page: &'a PageDocument, located: &mut Vec<CandidateTable<'a>>) {
    for comment_index in 0..page.comment_count() {
        if !page.comment_mentions_table(comment_index) {
            continue;
        }

        for (index, table) in page.comment_tables(comment_index).into_iter().enumerate() {
            let candidate = CandidateTable::new(table, TableSource::Comment(comment_index), index);
            if headers_match(&candidate.headers, &SWEEP_HEADER_KEYWORDS) {
                push_unique(located, candidate);
            }
        }
    }
}

fn headers_match(headers: &[String], keywords: &[&str]) -> bool {
    headers.iter().any(|header| {
        let lower = header.to_ascii_lowercase();
        keywords.iter().any(|keyword| lower.contains(keyword))
    })
}

fn push_unique<'a>(located: &mut Vec<CandidateTable<'a>>, candidate: CandidateTable<'a>) {
    if located
        .iter()
        .all(|existing| existing.identity() != candidate.identity())
    {
        located.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment_table_markup(id: &str, header: &str) -> String {
        format!(
            "<!-- <div><table id=\"{id}\"><thead><tr><th>{header}</th><th>MP</th></tr></thead>\
             <tbody><tr><td>Arsenal</td><td>38</td></tr></tbody></table></div> -->"
        )
    }

    #[test]
    fn exact_id_wins_over_comment_matches() {
        let markup = format!(
            "<html><body>\
             <table id=\"stats_standard\"><tr><th>Squad</th></tr><tr><td>Arsenal</td></tr></table>\
             {}\
             </body></html>",
            comment_table_markup("other", "Squad")
        );
        let page = PageDocument::parse(&markup);

        let located = locate_tables(&page).unwrap();

        assert_eq!(located[0].id.as_deref(), Some("stats_standard"));
        assert_eq!(located[0].source, TableSource::Main);
    }

    #[test]
    fn falls_back_to_id_keyword_in_main_document() {
        let markup = "<html><body>\
             <table id=\"results\"><tr><th>W</th></tr></table>\
             <table id=\"league_stats_for\"><tr><th>Squad</th></tr><tr><td>Leeds</td></tr></table>\
             </body></html>";
        let page = PageDocument::parse(markup);

        let located = locate_tables(&page).unwrap();

        assert_eq!(located[0].id.as_deref(), Some("league_stats_for"));
    }

    #[test]
    fn finds_id_keyword_table_inside_comment() {
        let markup = format!(
            "<html><body><div>no tables in the open</div>{}</body></html>",
            comment_table_markup("div_stats_squads", "Foo")
        );
        let page = PageDocument::parse(&markup);

        let located = locate_tables(&page).unwrap();

        assert_eq!(located[0].id.as_deref(), Some("div_stats_squads"));
        assert_eq!(located[0].source, TableSource::Comment(0));
    }

    #[test]
    fn finds_header_keyword_table_beyond_id_scan_window() {
        let mut body = String::new();
        for index in 0..60 {
            body.push_str(&format!("<!-- filler comment {index} -->"));
        }
        body.push_str(&comment_table_markup("nondescript", "Squad"));
        let markup = format!("<html><body>{body}</body></html>");
        let page = PageDocument::parse(&markup);

        let located = locate_tables(&page).unwrap();

        assert_eq!(located[0].source, TableSource::Comment(60));
        assert_eq!(located[0].id.as_deref(), Some("nondescript"));
    }

    #[test]
    fn reports_counts_when_no_table_matches() {
        let mut body = String::from("<table id=\"plain\"><tr><td>x</td></tr></table>");
        for index in 0..210 {
            body.push_str(&format!("<!-- filler comment {index} -->"));
        }
        body.push_str(&comment_table_markup("league_stats_hidden", "Squad"));
        let markup = format!("<html><body>{body}</body></html>");
        let page = PageDocument::parse(&markup);

        let error = locate_tables(&page).unwrap_err();
        let pipeline_error = error.downcast_ref::<PipelineError>().unwrap();

        match pipeline_error {
            PipelineError::TableUnresolved {
                main_tables,
                comments_scanned,
            } => {
                assert_eq!(*main_tables, 1);
                assert_eq!(*comments_scanned, 211);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sweep_does_not_duplicate_the_primary_table() {
        let markup = "<html><body>\
             <table id=\"stats_standard\"><thead><tr><th>Squad</th></tr></thead>\
             <tbody><tr><td>Arsenal</td></tr></tbody></table>\
             </body></html>";
        let page = PageDocument::parse(markup);

        let located = locate_tables(&page).unwrap();

        assert_eq!(located.len(), 1);
    }

    #[test]
    fn sweep_adds_comment_tables_with_matching_headers() {
        let markup = format!(
            "<html><body>\
             <table id=\"stats_standard\"><tr><th>Squad</th></tr><tr><td>Arsenal</td></tr></table>\
             {}{}\
             </body></html>",
            comment_table_markup("squad_shooting", "Team"),
            comment_table_markup("irrelevant", "Price")
        );
        let page = PageDocument::parse(&markup);

        let located = locate_tables(&page).unwrap();

        assert_eq!(located.len(), 2);
        assert_eq!(located[1].id.as_deref(), Some("squad_shooting"));
    }
}
