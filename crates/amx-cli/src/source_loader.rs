use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use amx_core::MatrixError;
use walkdir::WalkDir;

use crate::{map_cli_source_path, map_cli_source_prefix, map_cli_source_read, map_cli_source_scan};

pub(crate) fn resolve_path(raw: &str) -> Result<PathBuf, MatrixError> {
    let path = PathBuf::from(raw);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(map_cli_source_path)?
            .join(path)
    };

    if !absolute.exists() {
        return Err(MatrixError::new(
            "CLI_SOURCE_NOT_FOUND",
            format!("path does not exist: {}", absolute.display()),
        ));
    }
    Ok(absolute)
}

pub(crate) fn resolve_dictionary_dir(raw: &str) -> Result<PathBuf, MatrixError> {
    let absolute = resolve_path(raw)?;
    if !absolute.is_dir() {
        return Err(MatrixError::new(
            "CLI_SOURCE_NOT_DIR",
            format!("dictionary-dir is not a directory: {}", absolute.display()),
        ));
    }
    Ok(absolute)
}

pub(crate) fn read_text_file(raw: &str) -> Result<String, MatrixError> {
    let path = resolve_path(raw)?;
    fs::read_to_string(&path).map_err(map_cli_source_read)
}

/// Every `*.xml` below `dictionary_dir`, keyed by relative path.
pub(crate) fn read_dictionaries_from_dir(
    dictionary_dir: &Path,
) -> Result<BTreeMap<String, String>, MatrixError> {
    let mut dictionaries = BTreeMap::new();

    for entry in WalkDir::new(dictionary_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(map_cli_source_scan)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_xml = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("xml"));
        if !is_xml {
            continue;
        }

        let relative = path
            .strip_prefix(dictionary_dir)
            .map_err(map_cli_source_prefix)?
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(path).map_err(map_cli_source_read)?;
        dictionaries.insert(relative, content);
    }

    if dictionaries.is_empty() {
        return Err(MatrixError::new(
            "CLI_SOURCE_EMPTY",
            format!("No .xml dictionaries under {}", dictionary_dir.display()),
        ));
    }
    Ok(dictionaries)
}
