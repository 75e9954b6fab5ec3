use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::MappingsArgs;
use crate::normalize::{ColumnMappings, DEFAULT_MAPPINGS_PATH};

pub fn run(args: MappingsArgs) -> Result<()> {
    let path = args
        .mappings_path
        .unwrap_or_else(|| Path::new(DEFAULT_MAPPINGS_PATH).to_path_buf());

    let mappings = ColumnMappings::load(&path)?;
    info!(
        path = %path.display(),
        exact = mappings.exact_count(),
        patterns = mappings.pattern_count(),
        "resolved column mappings"
    );

    let rendered = serde_json::to_string_pretty(&mappings.resolved())
        .context("failed to render resolved mappings")?;
    println!("{rendered}");
    Ok(())
}
