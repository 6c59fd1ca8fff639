//! Workbook Discovery - Sheet Names Only
//!
//! Excel alignment needs nothing but tab names, which `.xlsx` stores in
//! `xl/workbook.xml`. Cell data is never read here.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to read workbook {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("workbook {path} is not a readable archive: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: ZipError,
    },

    #[error("workbook {path} has a malformed sheet index: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("unsupported workbook format: {0} (only .xlsx/.xlsm are readable)")]
    Unsupported(PathBuf),
}

/// Pick the data source in a directory: the first `*.xls*` by name.
///
/// Several candidates are allowed but logged; an empty or missing directory
/// yields `None`.
pub fn find_data_source(input_dir: &Path) -> Result<Option<PathBuf>, WorkbookError> {
    if !input_dir.is_dir() {
        return Ok(None);
    }
    let entries = fs::read_dir(input_dir).map_err(|source| WorkbookError::Io {
        path: input_dir.to_path_buf(),
        source,
    })?;

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| WorkbookError::Io {
            path: input_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_sheet = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("xls"));
        if is_sheet && path.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();

    if candidates.len() > 1 {
        warn!(
            count = candidates.len(),
            chosen = %candidates[0].display(),
            "multiple workbooks found, using the first"
        );
    }
    Ok(candidates.into_iter().next())
}

/// Tab names of an `.xlsx`/`.xlsm` workbook, in workbook order.
pub fn sheet_names(path: &Path) -> Result<Vec<String>, WorkbookError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if ext == "xls" {
        return Err(WorkbookError::Unsupported(path.to_path_buf()));
    }

    let io_err = |source: io::Error| WorkbookError::Io {
        path: path.to_path_buf(),
        source,
    };
    let archive_err = |source: ZipError| WorkbookError::Archive {
        path: path.to_path_buf(),
        source,
    };

    let mut archive = ZipArchive::new(File::open(path).map_err(io_err)?).map_err(archive_err)?;
    let mut xml = Vec::new();
    archive
        .by_name(WORKBOOK_PART)
        .map_err(archive_err)?
        .read_to_end(&mut xml)
        .map_err(io_err)?;

    let names = parse_sheet_index(&xml).map_err(|message| WorkbookError::Malformed {
        path: path.to_path_buf(),
        message,
    })?;
    info!(workbook = %path.display(), sheets = names.len(), "workbook sheets read");
    Ok(names)
}

fn parse_sheet_index(xml: &[u8]) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut names = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = e
                    .try_get_attribute("name")
                    .map_err(|err| err.to_string())?
                    .ok_or_else(|| "sheet entry without a name".to_string())?;
                names.push(name.unescape_value().map_err(|err| err.to_string())?.into_owned());
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
        buf.clear();
    }
    Ok(names)
}
