//! Readers for the two on-disk summand formats (spec.md 6 "Input file
//! formats"), grounded in `original_source/src/io.cpp`.

use std::fs;
use std::io::Read as _;
use std::path::Path;

use crate::error::SummationError;

/// Read a `.psllh` file: an ASCII header giving the expected entry count,
/// followed by that many whitespace-separated `f64` values.
///
/// Unlike the reference reader, which only warns to stderr when the body's
/// length doesn't match the header, a mismatch here is a hard
/// [`SummationError::IoFailure`] -- silently continuing past a corrupt
/// input file is exactly the kind of unchecked behaviour this crate
/// doesn't carry over.
pub fn read_psllh(path: &Path) -> Result<Vec<f64>, SummationError> {
    let contents = fs::read_to_string(path).map_err(|e| SummationError::IoFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut tokens = contents.split_whitespace();

    let header = tokens.next().ok_or_else(|| SummationError::IoFailure {
        path: path.display().to_string(),
        reason: "missing entry-count header".to_string(),
    })?;
    let expected: usize = header.parse().map_err(|_| SummationError::IoFailure {
        path: path.display().to_string(),
        reason: format!("header '{header}' is not a valid entry count"),
    })?;

    let values: Vec<f64> = tokens
        .map(|tok| {
            tok.parse::<f64>().map_err(|_| SummationError::IoFailure {
                path: path.display().to_string(),
                reason: format!("'{tok}' is not a valid floating point value"),
            })
        })
        .collect::<Result<_, _>>()?;

    if values.len() != expected {
        return Err(SummationError::IoFailure {
            path: path.display().to_string(),
            reason: format!(
                "header declares {expected} entries, file contains {}",
                values.len()
            ),
        });
    }

    Ok(values)
}

/// Read a `.binpsllh` file: a little-endian `u64` entry count, followed by
/// that many packed little-endian `f64` values.
pub fn read_binpsllh(path: &Path) -> Result<Vec<f64>, SummationError> {
    let mut file = fs::File::open(path).map_err(|e| SummationError::IoFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut header_bytes = [0u8; 8];
    file.read_exact(&mut header_bytes)
        .map_err(|e| SummationError::IoFailure {
            path: path.display().to_string(),
            reason: format!("reading entry-count header: {e}"),
        })?;
    let expected = u64::from_le_bytes(header_bytes) as usize;

    let mut body = Vec::new();
    file.read_to_end(&mut body)
        .map_err(|e| SummationError::IoFailure {
            path: path.display().to_string(),
            reason: format!("reading entry body: {e}"),
        })?;

    if body.len() != expected * std::mem::size_of::<f64>() {
        return Err(SummationError::IoFailure {
            path: path.display().to_string(),
            reason: format!(
                "header declares {expected} entries, file contains {} bytes of body",
                body.len()
            ),
        });
    }

    Ok(body
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect())
}

/// Dispatch on the file extension, matching `main.cpp`'s
/// `ends_with("binpsllh")` suffix check.
pub fn read_summands(path: &Path) -> Result<Vec<f64>, SummationError> {
    let is_binary = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("binpsllh"));

    if is_binary {
        read_binpsllh(path)
    } else {
        read_psllh(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn reads_well_formed_psllh() {
        let file = tempfile_with_contents("3\n1.0 2.5 -3.25\n");
        let values = read_psllh(file.path()).unwrap();
        assert_eq!(values, vec![1.0, 2.5, -3.25]);
        file.close().unwrap();
    }

    #[test]
    fn rejects_mismatched_psllh_count() {
        let file = tempfile_with_contents("3\n1.0 2.5\n");
        let err = read_psllh(file.path()).unwrap_err();
        assert!(matches!(err, SummationError::IoFailure { .. }));
        file.close().unwrap();
    }

    #[test]
    fn reads_well_formed_binpsllh() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u64.to_le_bytes());
        for v in [1.0f64, 2.5, -3.25] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let file = tempfile_with_bytes(&bytes);
        let values = read_binpsllh(file.path()).unwrap();
        assert_eq!(values, vec![1.0, 2.5, -3.25]);
        file.close().unwrap();
    }

    #[test]
    fn read_summands_dispatches_on_extension() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&42.0f64.to_le_bytes());
        let dir = std::env::temp_dir();
        let path = dir.join("treesum_test_dispatch.binpsllh");
        fs::write(&path, &bytes).unwrap();
        let values = read_summands(&path).unwrap();
        assert_eq!(values, vec![42.0]);
        fs::remove_file(&path).unwrap();
    }

    struct TempFile {
        path: std::path::PathBuf,
    }

    impl TempFile {
        fn path(&self) -> &Path {
            &self.path
        }
        fn close(self) -> std::io::Result<()> {
            fs::remove_file(&self.path)
        }
    }

    fn tempfile_with_contents(contents: &str) -> TempFile {
        tempfile_with_bytes(contents.as_bytes())
    }

    fn tempfile_with_bytes(bytes: &[u8]) -> TempFile {
        let path = std::env::temp_dir().join(format!(
            "treesum_test_{}_{}.tmp",
            std::process::id(),
            bytes.len()
        ));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        TempFile { path }
    }
}
