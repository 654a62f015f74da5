//! Writes the bridge's OpenAPI document.
//!
//!   cargo run --bin generate_openapi                    # to stdout
//!   cargo run --bin generate_openapi -- -o openapi.json

use std::{io::Write, path::PathBuf};

use anyhow::{bail, Context, Result};
use qingping_tuya_bridge::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn output_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("-o" | "--output") => match args.next() {
            Some(path) => Ok(Some(PathBuf::from(path))),
            None => bail!("--output needs a path"),
        },
        Some(other) => bail!("unexpected argument {other:?}; usage: generate_openapi [--output <path>]"),
    }
}

fn main() -> Result<()> {
    let doc = ApiDoc::openapi();
    let json = doc.to_pretty_json().context("failed to serialise OpenAPI document")?;

    match output_path()? {
        Some(path) => {
            std::fs::write(&path, &json).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} paths written to {}", doc.paths.paths.len(), path.display());
        }
        None => std::io::stdout()
            .write_all(json.as_bytes())
            .context("failed to write to stdout")?,
    }
    Ok(())
}
