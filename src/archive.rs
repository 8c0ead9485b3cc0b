//! Streaming reader for `.tar.gz` credential dumps.
//!
//! The archive is read as a flat sequence of [`ArchiveItem`]s: an entry's
//! name, its lines in bounded batches, then its end marker. Nothing is sized
//! from the tar header and no entry is ever held in memory whole, so a
//! multi-gigabyte dump file costs one batch of lines at a time.
//!
//! Only regular files are yielded; directories, links and other special
//! entries are skipped. A line longer than [`MAX_LINE_BYTES`] is dropped and
//! reported as [`ArchiveItem::Overlong`]. The first line that is not valid
//! UTF-8 yields a recoverable [`ArchiveError::Undecodable`], the rest of that
//! entry is skipped and iteration continues with the next entry. Corruption
//! of the tar or gzip stream ends iteration with [`ArchiveError::Read`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tokio::sync::mpsc;

use crate::error::ArchiveError;
use crate::normalize;

/// Lines handed over per [`ArchiveItem::Lines`] batch.
pub const LINE_BATCH: usize = 1024;

/// Longest line kept. Credential lines are far shorter; anything longer is
/// binary noise or a missing line terminator.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Prefix of an overlong line kept for logs and the reject file.
const OVERLONG_PREFIX_BYTES: usize = 80;

/// One step of a pass over the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveItem {
    /// A regular file starts. Its lines follow.
    Entry(String),
    /// Next non-empty lines of the current entry, in order.
    Lines(Vec<String>),
    /// A line of the current entry exceeded [`MAX_LINE_BYTES`] and was
    /// dropped. Carries the start of the line, lossily decoded.
    Overlong(String),
    /// The current entry was read to its end.
    EntryEnd,
}

pub struct ArchiveReader<R: Read> {
    archive: tar::Archive<GzDecoder<R>>,
}

impl ArchiveReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            archive: tar::Archive::new(GzDecoder::new(reader)),
        }
    }

    /// Single pass over the archive. Not restartable.
    pub fn items(&mut self) -> Result<ArchiveItems<'_, R>, ArchiveError> {
        Ok(ArchiveItems {
            inner: self.archive.entries()?,
            current: None,
            pending: None,
            done: false,
        })
    }
}

struct OpenEntry<'a, R: Read> {
    name: String,
    reader: BufReader<tar::Entry<'a, GzDecoder<R>>>,
    line_no: u64,
}

pub struct ArchiveItems<'a, R: Read> {
    inner: tar::Entries<'a, GzDecoder<R>>,
    current: Option<OpenEntry<'a, R>>,
    /// Produced while filling a batch; handed out on the next call.
    pending: Option<Result<ArchiveItem, ArchiveError>>,
    done: bool,
}

enum Line {
    Text(String),
    Overlong(String),
    Eof,
}

impl<R: Read> Iterator for ArchiveItems<'_, R> {
    type Item = Result<ArchiveItem, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.pending.take() {
            return Some(item);
        }
        if self.done {
            return None;
        }
        if self.current.is_some() {
            return Some(self.next_batch());
        }

        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(self.fail(e))),
            };

            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = match entry.path() {
                Ok(path) => path.to_string_lossy().into_owned(),
                Err(e) => return Some(Err(self.fail(e))),
            };

            self.current = Some(OpenEntry {
                name: name.clone(),
                reader: BufReader::new(entry),
                line_no: 0,
            });
            return Some(Ok(ArchiveItem::Entry(name)));
        }
    }
}

impl<R: Read> ArchiveItems<'_, R> {
    /// Reads up to [`LINE_BATCH`] lines of the open entry. Anything that
    /// interrupts a non-empty batch is parked in `pending` so the lines read
    /// so far are still delivered first.
    fn next_batch(&mut self) -> Result<ArchiveItem, ArchiveError> {
        let mut batch = Vec::new();
        let mut buf = Vec::new();

        while batch.len() < LINE_BATCH {
            let Some(open) = self.current.as_mut() else {
                break;
            };
            open.line_no += 1;

            let interrupt = match read_line(&mut open.reader, &mut buf) {
                Ok(Line::Text(text)) => {
                    batch.extend(normalize::lines(&text).map(str::to_owned));
                    continue;
                }
                Ok(Line::Overlong(prefix)) => Ok(ArchiveItem::Overlong(prefix)),
                Ok(Line::Eof) => {
                    self.current = None;
                    Ok(ArchiveItem::EntryEnd)
                }
                Err(LineReadError::Io(e)) => {
                    self.current = None;
                    Err(self.fail(e))
                }
                Err(LineReadError::Utf8(source)) => {
                    let entry = open.name.clone();
                    let line = open.line_no;
                    self.current = None;
                    Err(ArchiveError::Undecodable {
                        entry,
                        line,
                        source,
                    })
                }
            };

            if batch.is_empty() {
                return interrupt;
            }
            self.pending = Some(interrupt);
            break;
        }

        Ok(ArchiveItem::Lines(batch))
    }

    fn fail(&mut self, err: std::io::Error) -> ArchiveError {
        self.done = true;
        ArchiveError::Read(err)
    }
}

enum LineReadError {
    Io(std::io::Error),
    Utf8(std::string::FromUtf8Error),
}

/// Reads one `\n`-terminated line, never buffering more than
/// [`MAX_LINE_BYTES`] of it.
fn read_line<B: BufRead>(reader: &mut B, buf: &mut Vec<u8>) -> Result<Line, LineReadError> {
    buf.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    let n = reader
        .by_ref()
        .take(limit)
        .read_until(b'\n', buf)
        .map_err(LineReadError::Io)?;
    if n == 0 {
        return Ok(Line::Eof);
    }

    if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
        let prefix_len = OVERLONG_PREFIX_BYTES.min(buf.len());
        let prefix = String::from_utf8_lossy(&buf[..prefix_len]).into_owned();
        skip_rest_of_line(reader)?;
        return Ok(Line::Overlong(prefix));
    }

    match String::from_utf8(std::mem::take(buf)) {
        Ok(text) => Ok(Line::Text(text)),
        Err(e) => Err(LineReadError::Utf8(e)),
    }
}

fn skip_rest_of_line<B: BufRead>(reader: &mut B) -> Result<(), LineReadError> {
    loop {
        let chunk = reader.fill_buf().map_err(LineReadError::Io)?;
        if chunk.is_empty() {
            return Ok(());
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}

/// Opens `path` and reads it on a blocking thread, handing items over a
/// channel with room for one so at most two batches are held in memory.
///
/// Failure to open the file is returned immediately.
pub fn spawn_reader(
    path: &Path,
) -> Result<mpsc::Receiver<Result<ArchiveItem, ArchiveError>>, ArchiveError> {
    let reader = ArchiveReader::open(path)?;
    let (tx, rx) = mpsc::channel(1);

    tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        let items = match reader.items() {
            Ok(items) => items,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        for item in items {
            // Receiver dropped: the driver has stopped.
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
