//! Atomic CSV file writer.
//!
//! Rows go to a temporary file next to the destination, which replaces the
//! destination on `finish()`. Dropping the writer first deletes the temporary
//! file, so a failed run never leaves a half-written CSV behind.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::AppError;

/// A CSV writer that only becomes visible at its final path on `finish()`.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// Creates a writer targeting `final_path`, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the path has no parent or the temporary file
    /// cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if final_path.file_name().is_none() {
            return Err(AppError::Io(format!(
                "Not a file path: {}",
                final_path.display()
            )));
        }

        std::fs::create_dir_all(parent_dir)?;
        let temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|e| AppError::Io(format!("Failed to create temporary file: {}", e)))?;

        Ok(Self {
            writer: Writer::from_writer(BufWriter::new(temp_file)),
            final_path,
        })
    }

    pub fn write_record<I, T>(&mut self, record: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(record)?;
        Ok(())
    }

    /// Flushes and atomically moves the file into place. Returns the final path.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            AppError::Io(format!("Failed to flush CSV writer: {}", e.error()))
        })?;

        let named_temp = buf_writer
            .into_inner()
            .map_err(|e| AppError::Io(format!("Failed to flush buffer: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::Io(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}

/// Writes a header plus rows to `path` atomically.
pub fn write_csv_file(
    path: impl AsRef<Path>,
    header: &[String],
    rows: &[Vec<String>],
) -> Result<PathBuf, AppError> {
    let mut writer = AtomicCsvWriter::new(path)?;
    if !header.is_empty() {
        writer.write_record(header)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_successful_write() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("Account-query.csv");

        let mut writer = AtomicCsvWriter::new(&final_path).expect("Failed to create writer");
        writer.write_record(["Id", "Name"]).unwrap();
        writer.write_record(["001xx1", "Acme"]).unwrap();

        let result_path = writer.finish().expect("Failed to finish");

        assert_eq!(result_path, final_path);
        let content = fs::read_to_string(&final_path).unwrap();
        assert_eq!(content, "Id,Name\n001xx1,Acme\n");
    }

    #[test]
    fn test_drop_cleanup() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("output.csv");

        {
            let mut writer = AtomicCsvWriter::new(&final_path).expect("Failed to create writer");
            writer.write_record(["Header"]).unwrap();
            writer.write_record(["Data"]).unwrap();
        }

        let entries_after: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert!(entries_after.is_empty(), "Temp file should be removed on drop");
        assert!(!final_path.exists());
    }

    #[test]
    fn test_overwrite_behavior() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("output.csv");
        fs::write(&final_path, "OLD_CONTENT").unwrap();

        let mut writer = AtomicCsvWriter::new(&final_path).unwrap();
        writer.write_record(["NEW"]).unwrap();
        writer.finish().unwrap();

        let content = fs::read_to_string(&final_path).unwrap();
        assert_eq!(content, "NEW\n");
    }

    #[test]
    fn test_creates_missing_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let final_path = temp_dir.path().join("nested").join("data").join("Lead.csv");

        write_csv_file(&final_path, &["Id".to_string()], &[vec!["00Qxx1".to_string()]]).unwrap();

        assert_eq!(fs::read_to_string(&final_path).unwrap(), "Id\n00Qxx1\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_root_is_not_a_file_path() {
        assert!(matches!(AtomicCsvWriter::new("/"), Err(AppError::Io(_))));
    }

    #[test]
    fn test_write_csv_file_quotes_special_values() {
        let temp_dir = TempDir::new().unwrap();
        let final_path = temp_dir.path().join("complex.csv");

        let header = vec!["Name".to_string(), "Description".to_string()];
        let rows = vec![
            vec!["Item1".to_string(), "Contains, comma".to_string()],
            vec!["Item2".to_string(), "Multi\nline".to_string()],
        ];
        write_csv_file(&final_path, &header, &rows).unwrap();

        let mut reader = csv::Reader::from_path(&final_path).unwrap();
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "Contains, comma");
        assert_eq!(&records[1][1], "Multi\nline");
    }
}
