//! Static position to move table.
//!
//! Stored as a JSON object `{ "<FEN>": "<move>", ... }`. Opening positions
//! that are answered instantly live here instead of being searched.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TablebaseError {
    #[error("failed to read tablebase {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid tablebase {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// FEN to move lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tablebase {
    moves: HashMap<String, String>,
}

impl Tablebase {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            moves: entries
                .into_iter()
                .map(|(fen, mv)| (fen.replace('\n', ""), mv))
                .collect(),
        }
    }

    /// Loads the table from `path`. A missing file gives an empty table.
    pub fn load(path: &Path) -> Result<Self, TablebaseError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no tablebase file; starting with an empty table");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(TablebaseError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let entries: HashMap<String, String> =
            serde_json::from_str(&text).map_err(|source| TablebaseError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let table = Self::new(entries);
        info!(path = %path.display(), positions = table.len(), "tablebase loaded");
        Ok(table)
    }

    pub fn lookup(&self, fen: &str) -> Option<&str> {
        self.moves.get(fen).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}
