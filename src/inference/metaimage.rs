//! Minimal MetaImage (`.mha`) writer for signed 16-bit CT volumes.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Header keys owned by the writer; metadata entries with these names are dropped.
const RESERVED_KEYS: &[&str] = &[
    "ObjectType",
    "NDims",
    "BinaryData",
    "BinaryDataByteOrderMSB",
    "CompressedData",
    "TransformMatrix",
    "Offset",
    "CenterOfRotation",
    "ElementSpacing",
    "DimSize",
    "ElementType",
    "ElementDataFile",
];

/// A CT volume in Hounsfield units, stored z-major (`[z][y][x]`).
#[derive(Debug, Clone, PartialEq)]
pub struct CtImage {
    pub size: [usize; 3],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    /// Direction cosines, row major.
    pub direction: [f64; 9],
    pub metadata: BTreeMap<String, String>,
    pub voxels: Vec<i16>,
}

pub const IDENTITY_DIRECTION: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn write_metaimage(path: &Path, image: &CtImage) -> Result<()> {
    let expected = image.size.iter().product::<usize>();
    if image.voxels.len() != expected {
        return Err(Error::Tensor(format!(
            "volume {:?} needs {} voxels, got {}",
            image.size,
            expected,
            image.voxels.len()
        )));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // MetaIO stores the direction matrix column by column
    let d = &image.direction;
    let transform = [d[0], d[3], d[6], d[1], d[4], d[7], d[2], d[5], d[8]];

    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "ObjectType = Image")?;
    writeln!(file, "NDims = 3")?;
    writeln!(file, "BinaryData = True")?;
    writeln!(file, "BinaryDataByteOrderMSB = False")?;
    writeln!(file, "CompressedData = False")?;
    writeln!(file, "TransformMatrix = {}", join(&transform))?;
    writeln!(file, "Offset = {}", join(&image.origin))?;
    writeln!(file, "CenterOfRotation = 0 0 0")?;
    writeln!(file, "ElementSpacing = {}", join(&image.spacing))?;
    writeln!(file, "DimSize = {}", join(&image.size))?;
    for (key, value) in &image.metadata {
        let key = key.trim();
        if key.is_empty() || key.contains('=') || RESERVED_KEYS.contains(&key) {
            tracing::debug!("Skipping metadata key `{}`", key);
            continue;
        }
        writeln!(file, "{} = {}", key, value.replace(['\r', '\n'], " "))?;
    }
    writeln!(file, "ElementType = MET_SHORT")?;
    writeln!(file, "ElementDataFile = LOCAL")?;

    for &v in &image.voxels {
        file.write_all(&v.to_le_bytes())?;
    }
    file.flush()?;
    Ok(())
}

/// Read back a file produced by [`write_metaimage`]: header fields and voxels.
pub fn read_metaimage(path: &Path) -> Result<(BTreeMap<String, String>, Vec<i16>)> {
    let bytes = fs::read(path)?;
    let mut header = BTreeMap::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let end = bytes[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| offset + p)
            .ok_or_else(|| Error::Dataset("unterminated MetaImage header".to_string()))?;
        let line = String::from_utf8_lossy(&bytes[offset..end]).to_string();
        offset = end + 1;

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_string();
            let done = key == "ElementDataFile";
            header.insert(key, value.trim().to_string());
            if done {
                break;
            }
        }
    }

    let voxels = bytes[offset..]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    Ok((header, voxels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> CtImage {
        CtImage {
            size: [2, 1, 2],
            spacing: [0.5, 0.5, 2.0],
            origin: [-1.0, 0.0, 3.5],
            direction: [0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            metadata: BTreeMap::from([
                ("PatientID".to_string(), "p\n1".to_string()),
                ("DimSize".to_string(), "9 9 9".to_string()),
            ]),
            voxels: vec![-1024, 0, 40, 1200],
        }
    }

    #[test]
    fn header_and_voxels_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/ct.mha");
        write_metaimage(&path, &image()).unwrap();

        let (header, voxels) = read_metaimage(&path).unwrap();
        assert_eq!(header["DimSize"], "2 1 2");
        assert_eq!(header["ElementSpacing"], "0.5 0.5 2");
        assert_eq!(header["Offset"], "-1 0 3.5");
        assert_eq!(header["ElementType"], "MET_SHORT");
        assert_eq!(header["PatientID"], "p 1");
        assert_eq!(voxels, vec![-1024, 0, 40, 1200]);
    }

    #[test]
    fn element_data_file_is_last_header_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.mha");
        write_metaimage(&path, &image()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let header_len = bytes.len() - 4 * 2;
        let header = String::from_utf8(bytes[..header_len].to_vec()).unwrap();
        assert!(header.ends_with("ElementDataFile = LOCAL\n"));
    }

    #[test]
    fn voxel_count_must_match_size() {
        let mut bad = image();
        bad.voxels.pop();
        let dir = tempfile::tempdir().unwrap();
        assert!(write_metaimage(&dir.path().join("x.mha"), &bad).is_err());
    }
}
