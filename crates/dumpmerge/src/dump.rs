//! Legacy dump reading: locates per-table bulk-copy blocks.
//!
//! A dump artifact interleaves DDL with one data block per table:
//!
//! ```text
//! COPY profiles (id, email, country) FROM stdin;
//! 1\talice@example.com\tUS
//! 2\tbob@example.com\t\N
//! \.
//! ```
//!
//! Blocks are indexed once at open time. Record lines are returned raw:
//! field delimiters, the `\N` null marker, and any escaping inside fields
//! are preserved byte-for-byte so the staging copy re-emits exactly what
//! the legacy export produced.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Terminator line closing a bulk-copy block.
const BLOCK_TERMINATOR: &str = "\\.";

/// One table's data block from the dump.
#[derive(Debug, Clone)]
pub struct DumpBlock {
    /// Unqualified table name.
    pub table: String,
    /// Column names from the block header, when the dump carries them.
    pub columns: Option<Vec<String>>,
    /// Raw record lines, in dump order.
    pub rows: Vec<String>,
}

/// An opened dump artifact with its blocks indexed by table.
#[derive(Debug)]
pub struct DumpFile {
    blocks: Vec<DumpBlock>,
}

impl DumpFile {
    /// Opens and indexes a dump artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a block never
    /// reaches its terminator line.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::Extraction(format!("cannot open dump '{}': {e}", path.display()))
        })?;
        let dump = Self::read(BufReader::new(file))?;
        debug!(
            "Indexed {} bulk-copy block(s) from {}",
            dump.blocks.len(),
            path.display()
        );
        Ok(dump)
    }

    fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut blocks: Vec<DumpBlock> = Vec::new();
        let mut current: Option<DumpBlock> = None;

        for line in reader.lines() {
            let line =
                line.map_err(|e| Error::Extraction(format!("failed to read dump line: {e}")))?;
            match current.take() {
                Some(mut block) => {
                    if line == BLOCK_TERMINATOR {
                        blocks.push(block);
                    } else {
                        block.rows.push(line);
                        current = Some(block);
                    }
                }
                None => {
                    if let Some((table, columns)) = parse_copy_header(&line) {
                        current = Some(DumpBlock {
                            table,
                            columns,
                            rows: Vec::new(),
                        });
                    }
                }
            }
        }

        if let Some(block) = current {
            return Err(Error::Extraction(format!(
                "block for table {} is missing its terminator",
                block.table
            )));
        }
        Ok(Self { blocks })
    }

    /// Looks up the block for `table`, or `None` when the dump has no
    /// data for it.
    #[must_use]
    pub fn block(&self, table: &str) -> Option<&DumpBlock> {
        self.blocks.iter().find(|b| b.table == table)
    }

    /// Table names present in the dump, in artifact order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.table.as_str())
    }
}

/// Parses a `COPY <table> [(col, ...)] FROM stdin;` header line.
fn parse_copy_header(line: &str) -> Option<(String, Option<Vec<String>>)> {
    let rest = line.strip_prefix("COPY ")?;
    let rest = rest.strip_suffix("FROM stdin;")?.trim_end();

    let (table_part, columns) = match rest.find('(') {
        Some(start) => {
            let list = rest[start..]
                .trim()
                .strip_prefix('(')?
                .strip_suffix(')')?;
            let names = list
                .split(',')
                .map(|c| unquote(c.trim()).to_string())
                .collect();
            (rest[..start].trim(), Some(names))
        }
        None => (rest, None),
    };

    // Dumps may qualify the table ("public.events"); keep the bare name.
    let table = unquote(table_part.rsplit('.').next()?);
    if table.is_empty() || table.contains(char::is_whitespace) {
        return None;
    }
    Some((table.to_string(), columns))
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
#[path = "dump_tests.rs"]
mod tests;
