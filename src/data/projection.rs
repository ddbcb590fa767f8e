use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

const HEADER_LEN: u64 = 16;

/// One X-ray projection: row-major intensities of a `height x width` detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub height: usize,
    pub width: usize,
    pub values: Vec<f32>,
}

impl Projection {
    pub fn new(height: usize, width: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != height * width {
            return Err(Error::Dataset(format!(
                "projection of {}x{} needs {} values, got {}",
                height,
                width,
                height * width,
                values.len()
            )));
        }
        Ok(Projection {
            height,
            width,
            values,
        })
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.width + col]
    }
}

/// Read a projection file: little-endian `u64 height`, `u64 width`, then
/// `height * width` `f32` values.
pub fn read_projection(path: &Path) -> Result<Projection> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut file = BufReader::new(file);

    let mut size_buf = [0u8; 8];
    file.read_exact(&mut size_buf)?;
    let height = u64::from_le_bytes(size_buf);
    file.read_exact(&mut size_buf)?;
    let width = u64::from_le_bytes(size_buf);

    let body_len = height
        .checked_mul(width)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            Error::Dataset(format!(
                "{}: projection header {}x{} is too large",
                path.display(),
                height,
                width
            ))
        })?;
    if body_len > file_len.saturating_sub(HEADER_LEN) {
        return Err(Error::Dataset(format!(
            "{}: header declares {}x{} values but the file holds {} bytes",
            path.display(),
            height,
            width,
            file_len
        )));
    }
    let (height, width) = (height as usize, width as usize);

    let mut raw = vec![0u8; body_len as usize];
    file.read_exact(&mut raw)?;
    let values = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Projection::new(height, width, values)
}

pub fn write_projection(path: &Path, projection: &Projection) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    file.write_all(&(projection.height as u64).to_le_bytes())?;
    file.write_all(&(projection.width as u64).to_le_bytes())?;
    for &val in &projection.values {
        file.write_all(&val.to_le_bytes())?;
    }
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_layout_is_header_then_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        let projection = Projection::new(2, 3, vec![0.0, 0.1, 0.2, 1.0, 1.1, 1.2]).unwrap();
        write_projection(&path, &projection).unwrap();

        let bytes = std::fs::metadata(&path).unwrap().len();
        assert_eq!(bytes, 16 + 6 * 4);

        let loaded = read_projection(&path).unwrap();
        assert_eq!(loaded.get(1, 2), 1.2);
        assert_eq!(loaded.width, 3);
    }

    #[test]
    fn truncated_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u64.to_le_bytes());
        bytes.extend_from_slice(&4u64.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(read_projection(&path), Err(Error::Dataset(_))));
    }

    #[test]
    fn oversized_header_is_rejected_before_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.bin");
        for (height, width) in [(u64::MAX, 2u64), (1 << 40, 1 << 20)] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&height.to_le_bytes());
            bytes.extend_from_slice(&width.to_le_bytes());
            bytes.extend_from_slice(&[0u8; 8]);
            std::fs::write(&path, bytes).unwrap();

            assert!(matches!(read_projection(&path), Err(Error::Dataset(_))));
        }
    }

    #[test]
    fn truncated_header_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.bin");
        std::fs::write(&path, 3u64.to_le_bytes()).unwrap();

        assert!(matches!(read_projection(&path), Err(Error::Io(_))));
    }

    #[test]
    fn rejects_mismatched_value_count() {
        assert!(Projection::new(2, 2, vec![0.0; 3]).is_err());
    }
}
