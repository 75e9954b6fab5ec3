use std::cell::OnceCell;

use scraper::{ElementRef, Html, Node, Selector};

/// A parsed page plus the raw text of every HTML comment it contains.
///
/// FBref ships most stats tables commented out and reveals them with
/// client-side script, so the markup inside each comment has to be treated
/// as a document of its own. Comment bodies are re-parsed on first use and
/// memoized for the rest of the run.
pub struct PageDocument {
    main: Html,
    comments: Vec<String>,
    parsed_comments: Vec<OnceCell<Html>>,
}

impl PageDocument {
    pub fn parse(markup: &str) -> Self {
        let main = Html::parse_document(markup);
        let comments = collect_comment_texts(&main);
        let parsed_comments = (0..comments.len()).map(|_| OnceCell::new()).collect();

        Self {
            main,
            comments,
            parsed_comments,
        }
    }

    pub fn main_tables(&self) -> Vec<ElementRef<'_>> {
        select_tables(&self.main)
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    /// Cheap gate used before re-parsing a comment body.
    pub fn comment_mentions_table(&self, index: usize) -> bool {
        self.comments
            .get(index)
            .is_some_and(|comment| comment.contains("table"))
    }

    pub fn comment_tables(&self, index: usize) -> Vec<ElementRef<'_>> {
        let (Some(raw), Some(slot)) = (self.comments.get(index), self.parsed_comments.get(index))
        else {
            return Vec::new();
        };

        let document = slot.get_or_init(|| Html::parse_document(raw));
        select_tables(document)
    }
}

fn collect_comment_texts(document: &Html) -> Vec<String> {
    document
        .tree
        .root()
        .descendants()
        .filter_map(|node| match node.value() {
            Node::Comment(comment) => Some(comment.to_string()),
            _ => None,
        })
        .collect()
}

fn select_tables(document: &Html) -> Vec<ElementRef<'_>> {
    let table_selector = Selector::parse("table").unwrap();
    document.select(&table_selector).collect()
}

pub fn table_id(table: ElementRef<'_>) -> Option<&str> {
    table.value().attr("id")
}

pub fn table_header_texts(table: ElementRef<'_>) -> Vec<String> {
    let header_selector = Selector::parse("th").unwrap();
    table.select(&header_selector).map(normalized_text).collect()
}

pub fn normalized_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
