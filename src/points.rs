//! Point storage and the binary point-file format.
//!
//! Points live in a flat row-major buffer (structure-of-arrays, one row per
//! point) and are addressed by their index in the input order. That index is
//! the stable id every other module uses.
//!
//! # File format
//!
//! A fixed header followed by raw coordinate data, all little-endian:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 8 | magic `CANOPY01` |
//! | 8 | 8 | `n`, number of points (u64) |
//! | 16 | 4 | `dim`, coordinates per point (u32) |
//! | 20 | 4 | `fp_bytes`, 4 or 8 (u32) |
//! | 24 | `n * dim * fp_bytes` | row-major coordinates |
//!
//! Coordinates stored as f32 (`fp_bytes = 4`) widen to f64 on read.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{CoverError, Result};

const MAGIC: &[u8; 8] = b"CANOPY01";

/// A set of fixed-dimensional points in row-major storage.
#[derive(Clone, Debug, Default)]
pub struct PointSet {
    coords: Vec<f64>,
    dim: usize,
}

impl PointSet {
    /// Create an empty set with the given dimension.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(CoverError::InvalidParameter(
                "dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            coords: Vec::new(),
            dim,
        })
    }

    /// Build a set from a flat row-major buffer.
    pub fn from_flat(dim: usize, coords: Vec<f64>) -> Result<Self> {
        if dim == 0 || coords.len() % dim != 0 {
            return Err(CoverError::InvalidParameter(format!(
                "flat buffer of {} values is not a multiple of dim {}",
                coords.len(),
                dim
            )));
        }
        Ok(Self { coords, dim })
    }

    /// Append one point.
    pub fn push(&mut self, point: &[f64]) -> Result<()> {
        if point.len() != self.dim {
            return Err(CoverError::DimensionMismatch {
                got: point.len(),
                want: self.dim,
            });
        }
        self.coords.extend_from_slice(point);
        Ok(())
    }

    /// Number of points.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.coords.len() / self.dim
    }

    /// True when the set holds no points.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Coordinates per point.
    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Coordinate row of a point.
    #[inline]
    #[must_use]
    pub fn point(&self, id: usize) -> &[f64] {
        let start = id * self.dim;
        &self.coords[start..start + self.dim]
    }

    /// Iterate points in id order.
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.coords.chunks_exact(self.dim)
    }

    /// Serialized size of one point, in bytes.
    #[inline]
    #[must_use]
    pub fn point_nbytes(&self) -> usize {
        self.dim * std::mem::size_of::<f64>()
    }

    /// Append a point's little-endian coordinate bytes to `out`.
    pub fn pack_point(&self, id: usize, out: &mut Vec<u8>) {
        for c in self.point(id) {
            out.extend_from_slice(&c.to_le_bytes());
        }
    }

    /// Append a point previously written by [`PointSet::pack_point`].
    pub fn push_packed(&mut self, buf: &[u8]) -> Result<()> {
        if buf.len() != self.point_nbytes() {
            return Err(CoverError::DimensionMismatch {
                got: buf.len() / std::mem::size_of::<f64>(),
                want: self.dim,
            });
        }
        for chunk in buf.chunks_exact(8) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            self.coords.push(f64::from_le_bytes(raw));
        }
        Ok(())
    }

    /// Read a point set from a binary file (see the module docs for layout).
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(|e| CoverError::Io {
            op: "open",
            source: e,
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        read_exact(&mut reader, &mut magic)?;
        if &magic != MAGIC {
            return Err(CoverError::BadPointFile("bad magic".to_string()));
        }

        let mut word = [0u8; 8];
        read_exact(&mut reader, &mut word)?;
        let n = u64::from_le_bytes(word) as usize;

        let mut half = [0u8; 4];
        read_exact(&mut reader, &mut half)?;
        let dim = u32::from_le_bytes(half) as usize;
        read_exact(&mut reader, &mut half)?;
        let fp_bytes = u32::from_le_bytes(half) as usize;

        if dim == 0 {
            return Err(CoverError::BadPointFile("zero dimension".to_string()));
        }
        if fp_bytes != 4 && fp_bytes != 8 {
            return Err(CoverError::BadPointFile(format!(
                "unsupported fp width {fp_bytes}"
            )));
        }

        let mut payload = Vec::new();
        reader.read_to_end(&mut payload).map_err(|e| CoverError::Io {
            op: "read",
            source: e,
        })?;
        let want = n * dim * fp_bytes;
        if payload.len() != want {
            return Err(CoverError::BadPointFile(format!(
                "payload holds {} bytes, header promises {}",
                payload.len(),
                want
            )));
        }

        let mut coords = Vec::with_capacity(n * dim);
        if fp_bytes == 4 {
            for chunk in payload.chunks_exact(4) {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(chunk);
                coords.push(f64::from(f32::from_le_bytes(raw)));
            }
        } else {
            for chunk in payload.chunks_exact(8) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                coords.push(f64::from_le_bytes(raw));
            }
        }

        Ok(Self { coords, dim })
    }

    /// Write the set to a binary file with the given coordinate width.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P, fp_bytes: usize) -> Result<()> {
        if fp_bytes != 4 && fp_bytes != 8 {
            return Err(CoverError::InvalidParameter(format!(
                "fp width must be 4 or 8, got {fp_bytes}"
            )));
        }
        let file = File::create(path).map_err(|e| CoverError::Io {
            op: "create",
            source: e,
        })?;
        let mut writer = BufWriter::new(file);

        let mut header = Vec::with_capacity(24);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&(self.len() as u64).to_le_bytes());
        header.extend_from_slice(&(self.dim as u32).to_le_bytes());
        header.extend_from_slice(&(fp_bytes as u32).to_le_bytes());
        write_all(&mut writer, &header)?;

        if fp_bytes == 4 {
            for c in &self.coords {
                write_all(&mut writer, &(*c as f32).to_le_bytes())?;
            }
        } else {
            for c in &self.coords {
                write_all(&mut writer, &c.to_le_bytes())?;
            }
        }
        writer.flush().map_err(|e| CoverError::Io {
            op: "write",
            source: e,
        })
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| CoverError::Io {
        op: "read",
        source: e,
    })
}

fn write_all<W: Write>(writer: &mut W, buf: &[u8]) -> Result<()> {
    writer.write_all(buf).map_err(|e| CoverError::Io {
        op: "write",
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_index() {
        let mut set = PointSet::new(2).unwrap();
        set.push(&[1.0, 2.0]).unwrap();
        set.push(&[3.0, 4.0]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.point(1), &[3.0, 4.0]);
    }

    #[test]
    fn push_rejects_wrong_dimension() {
        let mut set = PointSet::new(3).unwrap();
        assert!(matches!(
            set.push(&[1.0]),
            Err(CoverError::DimensionMismatch { got: 1, want: 3 })
        ));
    }

    #[test]
    fn pack_unpack_round_trip() {
        let mut set = PointSet::new(3).unwrap();
        set.push(&[0.5, -1.25, 7.0]).unwrap();

        let mut buf = Vec::new();
        set.pack_point(0, &mut buf);
        assert_eq!(buf.len(), set.point_nbytes());

        let mut other = PointSet::new(3).unwrap();
        other.push_packed(&buf).unwrap();
        assert_eq!(other.point(0), set.point(0));
    }
}
