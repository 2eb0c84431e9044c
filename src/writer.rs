use crate::error::{Error, Result};
use crate::fragment::FenceTracker;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, info, warn};

/// Appends results to the output markdown file.
///
/// Every line is flushed as soon as it is added, so an interrupted run
/// keeps everything collected so far and can be resumed.
pub(crate) struct ResultWriter {
    path: PathBuf,
    file: File,
    entries: Vec<String>,
}

impl ResultWriter {
    /// Opens the output file.
    ///
    /// With `append` the file is extended; otherwise it is truncated,
    /// after a timestamped backup when `backup_existing` is set. An appended
    /// file that does not end in a newline gets one first, so the next
    /// heading starts on its own line.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created, or the
    /// backup fails.
    pub(crate) fn open(path: &Path, append: bool, backup_existing: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        if !append && backup_existing && path.exists() {
            backup_file(path)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(append)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        if append && lacks_trailing_newline(&mut file).map_err(|e| Error::io(path, e))? {
            debug!("Terminating last line of {}", path.display());
            writeln!(file).map_err(|e| Error::io(path, e))?;
        }

        info!(
            "{} {}",
            if append { "Appending to" } else { "Writing" },
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries: Vec::new(),
        })
    }

    /// Records a line and writes it through to disk.
    pub(crate) fn add(&mut self, line: &str) -> Result<()> {
        self.entries.push(line.to_string());
        writeln!(self.file, "{line}")
            .and_then(|()| self.file.flush())
            .map_err(|e| Error::io(&self.path, e))
    }

    /// Writes a `# title` heading followed by the model's response.
    ///
    /// A code fence left open by the response is closed, so later headings
    /// in the file stay visible on resume.
    pub(crate) fn collect(&mut self, title: &str, response: &str) -> Result<()> {
        self.add(&format!("# {title}"))?;
        self.add(response)?;

        let mut fence = FenceTracker::default();
        for line in response.lines() {
            fence.consume(line);
        }
        if let Some(closing) = fence.closing() {
            warn!("Response for '{title}' leaves a code fence open, closing it");
            self.add(&closing)?;
        }
        debug!("Collected response for '{title}'");
        Ok(())
    }

    /// Lines written during this run.
    pub(crate) fn entries(&self) -> &[String] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<String> {
        self.entries
    }
}

/// True if the file is non-empty and its last byte is not `\n`.
fn lacks_trailing_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Creates a timestamped copy of an existing file next to it.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_nanos();

    let filename = path
        .file_name()
        .ok_or_else(|| Error::config("Invalid file path"))?
        .to_string_lossy();

    let backup_path = path.with_file_name(format!("{filename}.backup.{timestamp}"));

    fs::copy(path, &backup_path).map_err(|e| Error::io(&backup_path, e))?;

    debug!("Created backup: {}", backup_path.display());
    Ok(backup_path)
}
