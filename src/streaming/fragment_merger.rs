//! Merging of generation fragments.
//!
//! Each generation batch writes its own fragment file. Once every batch has
//! finished, the fragments are concatenated in the order given (ascending
//! batch index) into a single output file.
//!
//! - Streaming copy (fragments are never loaded whole)
//! - Bytes are copied unchanged; a newline is only inserted where a fragment
//!   does not end with one, so rows never glue together
//! - Atomic output via a `.part` file renamed into place
//! - Fragments are removed afterwards, on success and on failure

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::AppError;

/// Buffer size for reading/writing (64 KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Concatenates `fragments` in order into `output` and removes the fragments.
///
/// Returns the output path.
///
/// # Errors
///
/// Returns `AppError::Io` if a fragment cannot be read or the output cannot be
/// written. No output file exists afterwards in that case.
pub async fn merge_fragments(fragments: &[PathBuf], output: &Path) -> Result<PathBuf, AppError> {
    let part_path = part_path_for(output);

    let merge_result = {
        let fragments = fragments.to_vec();
        let part_path = part_path.clone();

        tokio::task::spawn_blocking(move || concat_blocking(&fragments, &part_path))
            .await
            .map_err(|e| AppError::Internal(format!("Merge task panicked: {}", e)))?
    };

    remove_files(fragments).await;

    let bytes = match merge_result {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e);
        }
    };

    tokio::fs::rename(&part_path, output).await.map_err(|e| {
        AppError::Io(format!(
            "Failed to rename {} into place: {}",
            part_path.display(),
            e
        ))
    })?;

    info!(
        "[GEN] Merged {} fragments into {} ({} bytes)",
        fragments.len(),
        output.display(),
        bytes
    );
    Ok(output.to_path_buf())
}

/// Best-effort removal of files.
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if tokio::fs::remove_file(path).await.is_ok() {
            debug!("[GEN] Removed {}", path.display());
        }
    }
}

fn part_path_for(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

/// Copies every fragment into `output`. Returns the number of bytes written.
fn concat_blocking(fragments: &[PathBuf], output: &Path) -> Result<u64, AppError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let out_file = std::fs::File::create(output)
        .map_err(|e| AppError::Io(format!("Failed to create {}: {}", output.display(), e)))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, out_file);

    let mut written = 0u64;
    let mut last_ended_with_newline = true;

    for fragment in fragments {
        let file = std::fs::File::open(fragment).map_err(|e| {
            AppError::Io(format!("Failed to open fragment {}: {}", fragment.display(), e))
        })?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);

        let copied = copy_fragment(
            &mut reader,
            &mut writer,
            &mut last_ended_with_newline,
        )?;
        written += copied;
    }

    writer
        .flush()
        .map_err(|e| AppError::Io(format!("Failed to flush output: {}", e)))?;

    Ok(written)
}

/// Copies one fragment, first closing an unterminated last line of the
/// previous fragment.
fn copy_fragment<R: Read, W: Write>(
    reader: &mut BufReader<R>,
    writer: &mut BufWriter<W>,
    last_ended_with_newline: &mut bool,
) -> Result<u64, AppError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut last_byte: Option<u8> = None;
    let mut written = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| AppError::Io(format!("Failed to read fragment: {}", e)))?;

        if n == 0 {
            break;
        }

        if last_byte.is_none() && !*last_ended_with_newline {
            writer
                .write_all(b"\n")
                .map_err(|e| AppError::Io(format!("Failed to write: {}", e)))?;
            written += 1;
        }

        writer
            .write_all(&buf[..n])
            .map_err(|e| AppError::Io(format!("Failed to write: {}", e)))?;
        written += n as u64;
        last_byte = Some(buf[n - 1]);
    }

    if let Some(b) = last_byte {
        *last_ended_with_newline = b == b'\n';
    }

    Ok(written)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
