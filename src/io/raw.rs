//! Read / write float arrays as raw binary (little-endian `f32`, no header)

use std::fs::File;
use std::io::{Write, Read, BufWriter, BufReader};
use std::path::Path;

use ndarray::{Array3, ArrayView, Dimension};

use crate::{Error, Result};

pub fn write(data: impl Iterator<Item = f32>, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut buf = BufWriter::new(file);
    for datum in data {
        buf.write_all(&datum.to_le_bytes())?;
    }
    buf.flush()
}

type IORes<T> = std::io::Result<T>;
pub fn read<'a>(path: &Path) -> IORes<impl Iterator<Item = IORes<f32>> + 'a> {
    let file = File::open(path)?;
    let mut buf = BufReader::new(file);
    let mut buffer = [0; 4];

    Ok(std::iter::from_fn(move || {
        use std::io::ErrorKind::UnexpectedEof;
        match buf.read_exact(&mut buffer) {
            Ok(()) => Some(Ok(f32::from_le_bytes(buffer))),
            Err(e) if e.kind() == UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }))
}

/// Write any array, in logical (row-major) order
pub fn write_array<D: Dimension>(array: ArrayView<f32, D>, path: &Path) -> std::io::Result<()> {
    write(array.iter().copied(), path)
}

/// Read a 3-d array of the given shape. The file must contain exactly the
/// right number of values.
pub fn read_array3(path: &Path, shape: [usize; 3]) -> Result<Array3<f32>> {
    let expected: usize = shape.iter().product();
    let bytes = std::fs::metadata(path)?.len();
    if bytes % 4 != 0 {
        return Err(Error::config(format!(
            "{} is {bytes} bytes long, which is not a whole number of f32 values", path.display())))
    }
    let data: Vec<f32> = read(path)?.collect::<std::result::Result<_,_>>()?;
    if data.len() != expected {
        return Err(Error::config(format!(
            "{} contains {} values, but shape {:?} requires {}",
            path.display(), data.len(), shape, expected
        )))
    }
    Ok(Array3::from_shape_vec(shape, data)?)
}

/// Read a 3-d mask: any non-zero value is inside the mask
pub fn read_mask3(path: &Path, shape: [usize; 3]) -> Result<Array3<bool>> {
    Ok(read_array3(path, shape)?.mapv(|v| v != 0.0))
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn raw_io_roundtrip() -> std::io::Result<()> {
        // Harmless temporary location for output file
        let dir = tempdir()?;
        let file_path = dir.path().join("test.bin");

        // Some test data
        let original_data = vec![1.23, 4.56, 7.89];

        // Write data to file
        write(original_data.iter().copied(), &file_path)?;

        // Read data back from file
        let reloaded_data: Vec<_> = read(&file_path)?
            .collect::<std::result::Result<_, _>>()?;

        // Check that roundtrip didn't corrupt the data
        assert_eq!(original_data, reloaded_data);
        Ok(())
    }

    #[test]
    fn array_keeps_logical_order() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("image.raw");
        let image = Array3::from_shape_fn([2, 3, 4], |(z, y, x)| (100 * z + 10 * y + x) as f32);
        // Write a non-contiguous view, to make sure order is logical rather
        // than memory order
        let transposed = image.view().reversed_axes();
        write_array(transposed, &path)?;
        let reloaded = read_array3(&path, [4, 3, 2])?;
        assert_eq!(reloaded, transposed);
        Ok(())
    }

    #[test]
    fn wrong_size_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("short.raw");
        write([1.0, 2.0, 3.0].into_iter(), &path)?;
        let result = read_array3(&path, [2, 2, 2]);
        assert!(matches!(result, Err(Error::Configuration(_))));
        Ok(())
    }

    #[test]
    fn trailing_partial_value_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ragged.raw");
        write([1.0, 2.0].into_iter(), &path)?;
        std::fs::OpenOptions::new().append(true).open(&path)?.write_all(&[0xAB, 0xCD])?;
        let result = read_array3(&path, [1, 1, 2]);
        assert!(matches!(result, Err(Error::Configuration(_))));
        Ok(())
    }

    #[test]
    fn mask_is_nonzero() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("mask.raw");
        write([0.0, 1.0, 0.5, 0.0].into_iter(), &path)?;
        let mask = read_mask3(&path, [1, 2, 2])?;
        assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![false, true, true, false]);
        Ok(())
    }
}
