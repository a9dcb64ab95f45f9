//! Input/Output operations module.
//!
//! Handles FASTQ discovery and read accounting (see [`fastq`]) and writing
//! the aggregated tables. Tables are staged in a temporary file next to
//! their destination and only renamed into place once fully written.

pub mod fastq;

use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A fully written table waiting to be moved to its final path.
pub struct StagedFile {
    file: NamedTempFile,
    destination: PathBuf,
}

impl StagedFile {
    /// Atomically renames the staged file onto its destination.
    pub fn commit(self) -> Result<PathBuf, tempfile::PersistError> {
        self.file.persist(&self.destination)?;
        Ok(self.destination)
    }
}

fn staging_file(destination: &Path) -> std::io::Result<NamedTempFile> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut builder = tempfile::Builder::new();
    builder.prefix(".staged-");
    // Same mode as a plain `File::create`; the umask still applies.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(dir)
}

/// Replaces characters that would break a tab-separated row.
pub fn sanitize_field(value: &str) -> Cow<'_, str> {
    if value.contains(['\t', '\n', '\r']) {
        Cow::Owned(value.replace(['\t', '\n', '\r'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

/// Writes a tab-separated table with a header row.
///
/// Values are never quoted; tabs and line breaks inside values are replaced
/// by spaces so each row splits into exactly `header.len()` fields.
///
/// # Arguments
///
/// * `destination` - Final path of the table.
/// * `header` - Column names.
/// * `rows` - Row values, each the same width as `header`.
///
/// # Returns
///
/// * `csv::Result<StagedFile>` - The staged table, not yet visible at `destination`.
pub fn stage_tsv<I, R>(destination: &Path, header: &[String], rows: I) -> csv::Result<StagedFile>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[String]>,
{
    let mut file = staging_file(destination)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(file.as_file_mut());

        writer.write_record(header.iter().map(|h| sanitize_field(h).into_owned()))?;
        for row in rows {
            writer.write_record(row.as_ref().iter().map(|v| sanitize_field(v).into_owned()))?;
        }
        writer.flush()?;
    }
    file.as_file_mut().flush()?;

    Ok(StagedFile {
        file,
        destination: destination.to_path_buf(),
    })
}

/// Writes a single-column CSV with the given header.
pub fn stage_single_column_csv<I, S>(
    destination: &Path,
    header: &str,
    values: I,
) -> csv::Result<StagedFile>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut file = staging_file(destination)?;
    {
        let mut writer = csv::Writer::from_writer(file.as_file_mut());
        writer.write_record([header])?;
        for value in values {
            writer.write_record([value.as_ref()])?;
        }
        writer.flush()?;
    }
    file.as_file_mut().flush()?;

    Ok(StagedFile {
        file,
        destination: destination.to_path_buf(),
    })
}
