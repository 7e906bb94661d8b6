//! Self-describing columnar container for source state snapshots.
//!
//! File layout (all integers little-endian):
//!
//! ```text
//! "KSST"  u16 layout   u32 header_len  header  u32 header_crc
//! u64 body_len  body  u32 body_crc
//! ```
//!
//! The header is a bincode-encoded [`StateFileHeader`] holding the column
//! schema, the string metadata dictionary, and the row count, so metadata
//! can be read without touching row data. The body is a bincode-encoded
//! [`ColumnBatch`] with one column per field.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use kiln_common::{ContentDigest, DIGEST_LEN};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a source state file.
const STATE_MAGIC: [u8; 4] = *b"KSST";

/// Container layout revision. Increment on breaking changes to the framing.
const LAYOUT_REVISION: u16 = 1;

/// Upper bound on the encoded header size; anything larger is corruption.
const MAX_HEADER_LEN: u32 = 16 * 1024 * 1024;

/// Physical type of a column.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum FieldKind {
    /// UTF-8 string.
    Utf8,
    /// Fixed-width byte string of the given length.
    FixedBinary(u32),
    /// Variable-length list of non-null UTF-8 strings.
    Utf8List,
}

/// Declaration of one column.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Column name.
    pub name: String,
    /// Physical type.
    pub kind: FieldKind,
    /// Whether rows may hold a null in this column.
    pub nullable: bool,
}

impl FieldSpec {
    fn new(name: &str, kind: FieldKind, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable,
        }
    }
}

/// The three columns of a source state snapshot.
pub fn source_state_schema() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("source_file", FieldKind::Utf8, false),
        FieldSpec::new("digest", FieldKind::FixedBinary(DIGEST_LEN as u32), true),
        FieldSpec::new("outputs", FieldKind::Utf8List, false),
    ]
}

/// Leading section of a state file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateFileHeader {
    /// Column declarations, in column order.
    pub schema: Vec<FieldSpec>,
    /// Free-form string metadata.
    pub metadata: BTreeMap<String, String>,
    /// Number of rows in the body.
    pub row_count: u64,
}

/// Nullable fixed-width digest column: a validity bitmap plus packed values.
/// Null rows hold zero bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestColumn {
    validity: Vec<u8>,
    values: Vec<u8>,
}

/// List-of-strings column: `offsets[i]..offsets[i + 1]` indexes `values` for row `i`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringListColumn {
    offsets: Vec<u32>,
    values: Vec<String>,
}

impl Default for StringListColumn {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            values: Vec::new(),
        }
    }
}

/// Row data of a source state snapshot, stored column by column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBatch {
    source_file: Vec<String>,
    digest: DigestColumn,
    outputs: StringListColumn,
}

impl ColumnBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row.
    pub fn push<I>(&mut self, source_file: String, digest: Option<&ContentDigest>, outputs: I)
    where
        I: IntoIterator<Item = String>,
    {
        let row = self.source_file.len();
        self.source_file.push(source_file);

        if row % 8 == 0 {
            self.digest.validity.push(0);
        }
        match digest {
            Some(d) => {
                self.digest.validity[row / 8] |= 1 << (row % 8);
                self.digest.values.extend_from_slice(d.as_bytes());
            }
            None => self.digest.values.extend_from_slice(&[0; DIGEST_LEN]),
        }

        self.outputs.values.extend(outputs);
        self.outputs.offsets.push(self.outputs.values.len() as u32);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.source_file.len()
    }

    /// Returns `true` if the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.source_file.is_empty()
    }

    /// The stored source path of row `row`.
    pub fn source_file(&self, row: usize) -> &str {
        &self.source_file[row]
    }

    /// The digest of row `row`, or `None` if it is null.
    pub fn digest(&self, row: usize) -> Option<ContentDigest> {
        if self.digest.validity[row / 8] & (1 << (row % 8)) == 0 {
            return None;
        }
        let start = row * DIGEST_LEN;
        ContentDigest::from_slice(&self.digest.values[start..start + DIGEST_LEN])
    }

    /// The stored output paths of row `row`.
    pub fn outputs(&self, row: usize) -> &[String] {
        let start = self.outputs.offsets[row] as usize;
        let end = self.outputs.offsets[row + 1] as usize;
        &self.outputs.values[start..end]
    }

    /// Checks that every column holds exactly `rows` rows and that list
    /// offsets are in bounds, so the accessors cannot panic.
    fn validate(&self, rows: u64) -> Result<(), String> {
        let rows = usize::try_from(rows).map_err(|_| format!("row count {rows} too large"))?;
        if self.source_file.len() != rows {
            return Err(format!(
                "source_file column has {} rows, header declares {rows}",
                self.source_file.len()
            ));
        }
        if self.digest.validity.len() != rows.div_ceil(8)
            || self.digest.values.len() != rows * DIGEST_LEN
        {
            return Err("digest column length does not match row count".to_string());
        }
        let offsets = &self.outputs.offsets;
        if offsets.len() != rows + 1 || offsets[0] != 0 {
            return Err("outputs offsets do not match row count".to_string());
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err("outputs offsets are not monotonic".to_string());
        }
        if offsets[rows] as usize != self.outputs.values.len() {
            return Err("outputs offsets do not cover the value buffer".to_string());
        }
        Ok(())
    }
}

/// Writes a state file atomically: the data goes to a temporary file in the
/// destination directory, which is renamed over `path` only once complete.
pub fn write_state_file(
    path: &Path,
    metadata: &BTreeMap<String, String>,
    batch: &ColumnBatch,
) -> Result<(), CacheError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

    let header = StateFileHeader {
        schema: source_state_schema(),
        metadata: metadata.clone(),
        row_count: batch.len() as u64,
    };
    let header_bytes = encode(&header)?;
    if header_bytes.len() > MAX_HEADER_LEN as usize {
        return Err(CacheError::Serialization {
            reason: format!(
                "state header is {} bytes, limit is {MAX_HEADER_LEN}",
                header_bytes.len()
            ),
        });
    }
    let body_bytes = encode(batch)?;

    let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CacheError::io(&dir, e))?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        let write = |out: &mut BufWriter<&File>| -> std::io::Result<()> {
            out.write_all(&STATE_MAGIC)?;
            out.write_all(&LAYOUT_REVISION.to_le_bytes())?;
            out.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
            out.write_all(&header_bytes)?;
            out.write_all(&crc32fast::hash(&header_bytes).to_le_bytes())?;
            out.write_all(&(body_bytes.len() as u64).to_le_bytes())?;
            out.write_all(&body_bytes)?;
            out.write_all(&crc32fast::hash(&body_bytes).to_le_bytes())?;
            out.flush()
        };
        write(&mut out).map_err(|e| CacheError::io(tmp.path(), e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| CacheError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| CacheError::io(path, e.error))?;

    tracing::debug!(path = %path.display(), rows = batch.len(), "wrote source state");
    Ok(())
}

/// An open state file whose header has been read and verified.
pub struct StateFileReader {
    path: PathBuf,
    reader: BufReader<File>,
    header: StateFileHeader,
}

impl StateFileReader {
    /// Opens a state file and reads its header.
    ///
    /// Returns `Ok(None)` if the file does not exist. Row data is not read
    /// until [`read_batch`](Self::read_batch) is called.
    pub fn open(path: &Path) -> Result<Option<Self>, CacheError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        read_exact_checked(&mut reader, path, &mut magic)?;
        if magic != STATE_MAGIC {
            return Err(invalid_header(path, "missing magic bytes"));
        }
        let mut revision = [0u8; 2];
        read_exact_checked(&mut reader, path, &mut revision)?;
        let revision = u16::from_le_bytes(revision);
        if revision != LAYOUT_REVISION {
            return Err(invalid_header(
                path,
                &format!("layout revision {revision}, expected {LAYOUT_REVISION}"),
            ));
        }

        let header_len = read_u32(&mut reader, path)?;
        if header_len > MAX_HEADER_LEN {
            return Err(invalid_header(path, &format!("header length {header_len}")));
        }
        let header_bytes = read_section(&mut reader, path, header_len as usize)?;
        let header: StateFileHeader = decode(&header_bytes)?;

        let schema = source_state_schema();
        if header.schema != schema {
            return Err(CacheError::SchemaMismatch {
                path: path.to_path_buf(),
                reason: describe_schema_difference(&header.schema, &schema),
            });
        }

        Ok(Some(Self {
            path: path.to_path_buf(),
            reader,
            header,
        }))
    }

    /// The embedded metadata dictionary.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.header.metadata
    }

    /// Number of rows declared by the header.
    pub fn row_count(&self) -> u64 {
        self.header.row_count
    }

    /// Reads and verifies the row data.
    pub fn read_batch(mut self) -> Result<ColumnBatch, CacheError> {
        let mut len = [0u8; 8];
        read_exact_checked(&mut self.reader, &self.path, &mut len)?;
        let body_len = u64::from_le_bytes(len);
        let file_len = self
            .reader
            .get_ref()
            .metadata()
            .map_err(|e| CacheError::io(&self.path, e))?
            .len();
        if body_len > file_len {
            return Err(CacheError::Corrupted {
                path: self.path,
                reason: format!("body length {body_len} exceeds file size {file_len}"),
            });
        }
        let body = read_section(&mut self.reader, &self.path, body_len as usize)?;
        let batch: ColumnBatch = decode(&body)?;
        batch
            .validate(self.header.row_count)
            .map_err(|reason| CacheError::Corrupted {
                path: self.path.clone(),
                reason,
            })?;
        Ok(batch)
    }
}

fn describe_schema_difference(found: &[FieldSpec], expected: &[FieldSpec]) -> String {
    if found.len() != expected.len() {
        return format!("{} columns, expected {}", found.len(), expected.len());
    }
    found
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (f, e))| f != e)
        .map(|(i, (f, e))| format!("column {i} is {f:?}, expected {e:?}"))
        .unwrap_or_default()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CacheError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
}

fn invalid_header(path: &Path, reason: &str) -> CacheError {
    CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Reads exactly `buf.len()` bytes; a short file is corruption, not an I/O failure.
fn read_exact_checked(
    reader: &mut impl Read,
    path: &Path,
    buf: &mut [u8],
) -> Result<(), CacheError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CacheError::Corrupted {
                path: path.to_path_buf(),
                reason: "unexpected end of file".to_string(),
            }
        } else {
            CacheError::io(path, e)
        }
    })
}

fn read_u32(reader: &mut impl Read, path: &Path) -> Result<u32, CacheError> {
    let mut buf = [0u8; 4];
    read_exact_checked(reader, path, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads a `len`-byte section followed by its CRC32 and verifies it.
fn read_section(reader: &mut impl Read, path: &Path, len: usize) -> Result<Vec<u8>, CacheError> {
    let mut bytes = vec![0u8; len];
    read_exact_checked(reader, path, &mut bytes)?;
    let expected = read_u32(reader, path)?;
    let actual = crc32fast::hash(&bytes);
    if expected != actual {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(bytes)
}
