use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch {url} after {attempts} attempts")]
    FetchExhausted { url: String, attempts: usize },

    #[error(
        "could not find a usable stats table ({main_tables} tables in main document, {comments_scanned} comments checked)"
    )]
    TableUnresolved {
        main_tables: usize,
        comments_scanned: usize,
    },

    #[error("no candidate table could be parsed into a record set")]
    NothingExtracted,

    #[error("table filter `{filter}` matched none of the {extracted} extracted tables")]
    FilterMatchedNothing { filter: String, extracted: usize },
}
