//! Append-only file.
//!
//! The log is a bare concatenation of RESP-encoded write commands in
//! commit order. Appends go through a buffered writer flushed per
//! command ("append on commit"); replay parses the file back into
//! argument vectors for the caller to push through the dispatcher.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{info, warn};

use hearth_protocol::{encode_command, parse_command, Input};

use crate::format::FormatError;

/// The open append-only log.
#[derive(Debug)]
pub struct AofLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AofLog {
    /// Opens (creating if needed) the log at `path` for appending.
    pub fn open(path: &Path) -> Result<Self, FormatError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    /// A log that drops appends; used while appendonly is disabled so
    /// call sites stay unconditional.
    pub fn disabled(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one committed write command.
    pub fn append<A: AsRef<[u8]>>(&mut self, args: &[A]) {
        let Some(writer) = &mut self.writer else {
            return;
        };
        let payload = encode_command(args);
        if let Err(e) = writer.write_all(&payload).and_then(|_| writer.flush()) {
            warn!(path = %self.path.display(), error = %e, "aof append failed");
        }
    }

    /// Replaces the log's contents with a fresh command stream
    /// (BGREWRITEAOF): the caller provides the already-encoded
    /// commands that rebuild the current keyspace.
    pub fn rewrite(&mut self, commands: &[Bytes]) -> Result<(), FormatError> {
        let mut file = File::create(&self.path)?;
        for cmd in commands {
            file.write_all(cmd)?;
        }
        file.sync_all()?;
        if self.writer.is_some() {
            let reopened = OpenOptions::new().append(true).open(&self.path)?;
            self.writer = Some(BufWriter::new(reopened));
        }
        info!(path = %self.path.display(), commands = commands.len(), "aof rewritten");
        Ok(())
    }

    /// Parses the log at `path` into argument vectors. Stops at the
    /// first truncated command (a crashed append can leave one).
    pub fn read_all(path: &Path) -> Result<Vec<Vec<Bytes>>, FormatError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            match parse_command(&data[pos..]) {
                Some(Input::Complete { args, consumed }) => {
                    out.push(args);
                    pos += consumed;
                }
                Some(Input::Empty { consumed }) => pos += consumed,
                Some(Input::Malformed { .. }) | None => {
                    warn!(
                        path = %path.display(),
                        offset = pos,
                        "aof truncated or malformed; replaying prefix"
                    );
                    break;
                }
            }
        }
        Ok(out)
    }
}
