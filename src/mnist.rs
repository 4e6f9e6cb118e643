use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use itertools::Itertools;
use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{Error, Result};

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

/// Affine rescaling applied to every pixel after it has been mapped to [0, 1]:
/// `(pixel - mean) / std`. The default sends pixels to [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f64,
    pub std: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization { mean: 0.5, std: 0.5 }
    }
}

impl Normalization {
    fn apply(&self, pixel: u8) -> f64 {
        (pixel as f64 / 255.0 - self.mean) / self.std
    }
}

/// The MNIST training and test sets.
pub struct MnistData {
    pub training_data: Dataset,
    pub test_data: Dataset,
}

impl MnistData {
    /// Loads the four MNIST files from `dir`. Each file is looked up gzip-compressed first
    /// (`train-images-idx3-ubyte.gz`), then uncompressed.
    pub fn load(dir: impl AsRef<Path>, normalization: Normalization) -> Result<MnistData> {
        let dir = dir.as_ref();
        let training_data = read_dataset(
            dir,
            "train-images-idx3-ubyte",
            "train-labels-idx1-ubyte",
            normalization,
        )?;
        let test_data = read_dataset(
            dir,
            "t10k-images-idx3-ubyte",
            "t10k-labels-idx1-ubyte",
            normalization,
        )?;

        Ok(MnistData {
            training_data,
            test_data,
        })
    }
}

fn read_dataset(
    dir: &Path,
    images_name: &str,
    labels_name: &str,
    normalization: Normalization,
) -> Result<Dataset> {
    let image_bytes = read_bytes(&locate(dir, images_name)?)?;
    let label_bytes = read_bytes(&locate(dir, labels_name)?)?;
    let dataset = images_and_labels_to_data(&image_bytes, &label_bytes, normalization)?;
    debug!(
        "loaded {} examples of dimension {} from {}",
        dataset.len(),
        dataset.input_dim(),
        dir.join(images_name).display()
    );
    Ok(dataset)
}

fn locate(dir: &Path, name: &str) -> Result<PathBuf> {
    let compressed = dir.join(format!("{name}.gz"));
    if compressed.exists() {
        return Ok(compressed);
    }
    let raw = dir.join(name);
    if raw.exists() {
        return Ok(raw);
    }
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("neither {} nor {} exists", compressed.display(), raw.display()),
    )))
}

// Reads a whole file, transparently decompressing it when it ends in `.gz`.
fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut bytes = Vec::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(file).read_to_end(&mut bytes)?;
    } else {
        file.read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

// Reads `count` big-endian u32 header fields from the front of `bytes`.
fn read_header(bytes: &[u8], count: usize, what: &str) -> Result<Vec<u32>> {
    if bytes.len() < count * 4 {
        return Err(Error::Format(format!(
            "{what} file is {} bytes, too short for its {}-byte header",
            bytes.len(),
            count * 4
        )));
    }
    Ok(bytes[..count * 4]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Turns the raw bytes of an IDX image file and an IDX label file into a dataset with one
/// normalized, flattened image per row.
pub fn images_and_labels_to_data(
    image_bytes: &[u8],
    label_bytes: &[u8],
    normalization: Normalization,
) -> Result<Dataset> {
    // The image header is four u32s: the magic number, the number of images, the number of
    // rows per image, and the number of columns per image.
    let image_header = read_header(image_bytes, 4, "image")?;
    if image_header[0] != IMAGE_MAGIC {
        return Err(Error::Format(format!(
            "image magic number is {}, expected {IMAGE_MAGIC}",
            image_header[0]
        )));
    }
    let images = image_header[1] as usize;
    // A header can claim any dimensions it likes, so the sizes derived from it are computed
    // with checked arithmetic and an overflow is reported as malformed data.
    let pixels_per_image = (image_header[2] as usize)
        .checked_mul(image_header[3] as usize)
        .ok_or_else(|| Error::Format("image dimensions overflow".to_owned()))?;
    let payload = images
        .checked_mul(pixels_per_image)
        .ok_or_else(|| Error::Format("image dimensions overflow".to_owned()))?;

    // The label header is two u32s: the magic number and the number of labels.
    let label_header = read_header(label_bytes, 2, "label")?;
    if label_header[0] != LABEL_MAGIC {
        return Err(Error::Format(format!(
            "label magic number is {}, expected {LABEL_MAGIC}",
            label_header[0]
        )));
    }
    let labels = label_header[1] as usize;

    if images != labels {
        return Err(Error::Format(format!(
            "{images} images but {labels} labels"
        )));
    }

    // Everything after the headers is payload: one byte per pixel, images stored row-major one
    // after another, and one byte per label. Trailing bytes beyond what the headers announce
    // are ignored.
    let pixel_bytes = &image_bytes[16..];
    let label_bytes = &label_bytes[8..];
    if pixel_bytes.len() < payload || label_bytes.len() < labels {
        return Err(Error::Format(format!(
            "payload truncated: {} pixel bytes for {images} images of {pixels_per_image} pixels, {} label bytes",
            pixel_bytes.len(),
            label_bytes.len()
        )));
    }

    // Each image-sized chunk of pixel bytes becomes one row of the matrix, normalized on the
    // way in. A zero-pixel image has no bytes to chunk, so its rows simply stay empty.
    let mut image_matrix = Array2::zeros((images, pixels_per_image));
    let image_chunks = pixel_bytes[..payload].iter().chunks(pixels_per_image.max(1));
    for (mut row, image_chunk) in image_matrix.rows_mut().into_iter().zip(&image_chunks) {
        row.iter_mut()
            .zip(image_chunk)
            .for_each(|(pixel, &value)| *pixel = normalization.apply(value));
    }

    let label_vector: Array1<usize> = label_bytes[..labels].iter().map(|&l| l as usize).collect();
    Dataset::new(image_matrix, label_vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    fn idx_images(count: u32, rows: u32, cols: u32, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [IMAGE_MAGIC, count, rows, cols] {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        bytes.extend_from_slice(pixels);
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [LABEL_MAGIC, labels.len() as u32] {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn parses_and_normalizes() {
        let images = idx_images(2, 2, 2, &[0, 255, 51, 204, 255, 255, 0, 0]);
        let labels = idx_labels(&[7, 3]);

        let dataset = images_and_labels_to_data(&images, &labels, Normalization::default()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.input_dim(), 4);
        assert_eq!(dataset.labels().to_vec(), vec![7, 3]);
        assert_abs_diff_eq!(dataset.images()[[0, 0]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dataset.images()[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dataset.images()[[0, 2]], -0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(dataset.images()[[1, 3]], -1.0, epsilon = 1e-12);

        let unit = Normalization { mean: 0.0, std: 1.0 };
        let dataset = images_and_labels_to_data(&images, &labels, unit).unwrap();
        assert_abs_diff_eq!(dataset.images()[[0, 3]], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn rejects_bad_magic_numbers() {
        let mut images = idx_images(1, 1, 1, &[0]);
        images[3] = 0;
        let labels = idx_labels(&[1]);
        assert!(matches!(
            images_and_labels_to_data(&images, &labels, Normalization::default()),
            Err(Error::Format(_))
        ));

        let images = idx_images(1, 1, 1, &[0]);
        assert!(matches!(
            images_and_labels_to_data(&images, &images, Normalization::default()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn rejects_count_mismatch_and_truncation() {
        let images = idx_images(2, 1, 1, &[0, 1]);
        assert!(matches!(
            images_and_labels_to_data(&images, &idx_labels(&[1]), Normalization::default()),
            Err(Error::Format(_))
        ));

        let truncated = idx_images(2, 2, 2, &[0, 1, 2]);
        assert!(matches!(
            images_and_labels_to_data(&truncated, &idx_labels(&[1, 2]), Normalization::default()),
            Err(Error::Format(_))
        ));

        assert!(matches!(
            images_and_labels_to_data(&[0, 0], &idx_labels(&[]), Normalization::default()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn rejects_headers_whose_dimensions_overflow() {
        let images = idx_images(2, u32::MAX, u32::MAX, &[]);
        let labels = idx_labels(&[0, 1]);
        match images_and_labels_to_data(&images, &labels, Normalization::default()) {
            Err(Error::Format(message)) => assert_eq!(message, "image dimensions overflow"),
            other => panic!("expected a format error, got {other:?}"),
        }
    }

    #[test]
    fn every_row_holds_its_own_image() {
        let pixels: Vec<u8> = (0..12).map(|p| p * 20).collect();
        let images = idx_images(3, 2, 2, &pixels);
        let unit = Normalization { mean: 0.0, std: 1.0 };
        let dataset = images_and_labels_to_data(&images, &idx_labels(&[4, 5, 6]), unit).unwrap();

        for (index, row) in dataset.images().rows().into_iter().enumerate() {
            let expected: Vec<f64> = pixels[index * 4..index * 4 + 4]
                .iter()
                .map(|&p| p as f64 / 255.0)
                .collect();
            assert_eq!(row.to_vec(), expected);
        }
    }

    #[test]
    fn loads_gzipped_and_raw_files() {
        let dir = std::env::temp_dir().join(format!("digit-trainer-mnist-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let write_gz = |name: &str, bytes: &[u8]| {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes).unwrap();
            std::fs::write(dir.join(format!("{name}.gz")), encoder.finish().unwrap()).unwrap();
        };
        write_gz("train-images-idx3-ubyte", &idx_images(3, 1, 2, &[0, 255, 10, 20, 30, 40]));
        write_gz("train-labels-idx1-ubyte", &idx_labels(&[0, 1, 2]));
        std::fs::write(dir.join("t10k-images-idx3-ubyte"), idx_images(1, 1, 2, &[255, 0])).unwrap();
        std::fs::write(dir.join("t10k-labels-idx1-ubyte"), idx_labels(&[9])).unwrap();

        let data = MnistData::load(&dir, Normalization::default()).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(data.training_data.len(), 3);
        assert_eq!(data.training_data.input_dim(), 2);
        assert_eq!(data.test_data.labels().to_vec(), vec![9]);
        assert_abs_diff_eq!(data.test_data.images()[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_files_are_io_errors() {
        let dir = std::env::temp_dir().join("digit-trainer-definitely-missing");
        assert!(matches!(
            MnistData::load(&dir, Normalization::default()),
            Err(Error::Io(_))
        ));
    }
}
