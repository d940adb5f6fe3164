use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::RawRecord;

/// Where one source table comes from.
#[derive(Clone)]
pub enum SourceInput {
    File(PathBuf),
    /// An uploaded or otherwise in-memory table.
    Bytes { label: String, data: Bytes },
}

impl SourceInput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        SourceInput::File(path.into())
    }

    pub fn bytes(label: impl Into<String>, data: impl Into<Bytes>) -> Self {
        SourceInput::Bytes {
            label: label.into(),
            data: data.into(),
        }
    }
}

impl fmt::Debug for SourceInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceInput::File(path) => write!(f, "File({})", path.display()),
            SourceInput::Bytes { label, data } => write!(f, "Bytes({label}, {} bytes)", data.len()),
        }
    }
}

/// Lazy, single-pass sequence of records read from `R`. Short rows leave
/// trailing fields absent, long rows drop the overflow, and only a failing
/// reader ends the stream with an error.
pub struct RecordStream<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    row: csv::ByteRecord,
    finished: bool,
}

impl<R: Read> RecordStream<R> {
    pub fn new(input: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(input);

        let headers = match reader.byte_headers() {
            Ok(headers) => headers
                .iter()
                .map(|h| String::from_utf8_lossy(h).into_owned())
                .collect(),
            Err(err) => return Err(stream_error(err)),
        };

        Ok(Self {
            reader,
            headers,
            row: csv::ByteRecord::new(),
            finished: false,
        })
    }

    fn to_record(&self) -> RawRecord {
        self.headers
            .iter()
            .zip(self.row.iter())
            .map(|(field, value)| (field.clone(), String::from_utf8_lossy(value).into_owned()))
            .collect()
    }
}

impl<R: Read> Iterator for RecordStream<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.reader.read_byte_record(&mut self.row) {
                Ok(true) => return Some(Ok(self.to_record())),
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(err) if is_fatal(&err) => {
                    self.finished = true;
                    return Some(Err(stream_error(err)));
                }
                Err(err) => {
                    debug!(error = %err, "skipping malformed row");
                }
            }
        }
    }
}

fn is_fatal(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

fn stream_error(err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unreadable table: {other:?}"),
        )),
    }
}

/// Drive one source to completion, returning its records in input order.
///
/// Blocking; the orchestrator runs this on a blocking worker.
pub fn read_source(name: &str, input: &SourceInput) -> Result<Vec<RawRecord>> {
    let records = match input {
        SourceInput::File(path) => {
            let file = File::open(path).map_err(|err| {
                Error::source_failure(name, format!("{}: {err}", path.display()))
            })?;
            collect(name, file)?
        }
        SourceInput::Bytes { data, .. } => collect(name, Cursor::new(data.clone()))?,
    };

    debug!(source = name, rows = records.len(), "source loaded");
    Ok(records)
}

fn collect<R: Read>(name: &str, input: R) -> Result<Vec<RawRecord>> {
    RecordStream::new(input)
        .and_then(|stream| stream.collect::<Result<Vec<_>>>())
        .map_err(|err| match err {
            Error::Source { .. } => err,
            other => Error::source_failure(name, other),
        })
}
