//! Writes the OpenAPI document of the Buddy API to disk.
//!
//! Usage: `openapi [OUTPUT]`, where `OUTPUT` defaults to `openapi.json`.

use buddy_api::router::ApiDoc;
use std::path::{Path, PathBuf};
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn write_document(api_doc: &utoipa::openapi::OpenApi, path: &Path) -> anyhow::Result<()> {
    let json = api_doc.to_pretty_json()?;
    std::fs::write(path, json)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let output = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    write_document(&ApiDoc::openapi(), &output)?;
    println!("OpenAPI document written to {}", output.display());
    Ok(())
}
