//! Microscopy image I/O for background processing.
//!
//! Handles the file side of the pipeline: finding the frames of a series in a
//! directory, decoding them into floating point arrays, and writing processed
//! results back out as standard image files.
//!
//! # Intensity Conventions
//!
//! Decoded frames are scaled to [0, 1] by the range of their integer type:
//! - 8-bit: value / 255
//! - 16-bit: value / 65535
//! - 32-bit float: used as stored
//!
//! Colour frames are reduced to luma before scaling.
//!
//! # Frame Discovery
//!
//! Directory listings keep only files whose leading bytes identify a known
//! image format, regardless of extension, and are ordered by natural sort of
//! the file name so `2.tif` precedes `10.tif`.

use image::{DynamicImage, ImageBuffer, ImageReader, Luma, RgbImage};
use ndarray::Array2;
use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of leading bytes inspected when sniffing the image format
const MAGIC_BYTES: usize = 32;

/// Errors raised while reading or writing image files
#[derive(Error, Debug)]
pub enum ImageIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image decode/encode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),
}

/// Compare two strings using natural, case-insensitive ordering.
///
/// Runs of ASCII digits compare by numeric value, everything else compares
/// character by character after lowercasing.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let x_run = take_digits(&mut left);
                let y_run = take_digits(&mut right);

                let x_trim = x_run.trim_start_matches('0');
                let y_trim = y_run.trim_start_matches('0');
                let ordering = x_trim
                    .len()
                    .cmp(&y_trim.len())
                    .then_with(|| x_trim.cmp(y_trim))
                    .then_with(|| x_run.len().cmp(&y_run.len()));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_lowercase().cmp(y.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Check whether a file's content starts with a known image signature.
///
/// Unreadable files and directories are reported as non-images.
pub fn is_image_file<P: AsRef<Path>>(path: P) -> bool {
    let Ok(mut file) = File::open(path.as_ref()) else {
        return false;
    };

    let mut header = [0u8; MAGIC_BYTES];
    let Ok(read) = file.read(&mut header) else {
        return false;
    };

    image::guess_format(&header[..read]).is_ok()
}

/// List the image files of a directory in natural file name order.
///
/// # Arguments
/// * `dir` - Directory holding one series of frames
///
/// # Returns
/// Paths of every regular file whose content is a recognised image format
pub fn list_image_paths<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, ImageIoError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Convert a decoded image into a floating point intensity array in [0, 1].
///
/// # Coordinate Mapping
/// Image pixel (x, y) maps to array element [y, x].
pub fn dynamic_image_to_array2(image: &DynamicImage) -> Result<Array2<f64>, ImageIoError> {
    let (width, height) = (image.width() as usize, image.height() as usize);

    let array = match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => {
            let luma = image.to_luma8();
            Array2::from_shape_fn((height, width), |(y, x)| {
                luma.get_pixel(x as u32, y as u32)[0] as f64 / u8::MAX as f64
            })
        }
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => {
            let luma = image.to_luma16();
            Array2::from_shape_fn((height, width), |(y, x)| {
                luma.get_pixel(x as u32, y as u32)[0] as f64 / u16::MAX as f64
            })
        }
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            let luma = image.to_luma32f();
            Array2::from_shape_fn((height, width), |(y, x)| {
                luma.get_pixel(x as u32, y as u32)[0] as f64
            })
        }
        other => {
            return Err(ImageIoError::UnsupportedPixelType(format!(
                "{:?}",
                other.color()
            )))
        }
    };

    Ok(array)
}

/// Decode an image file into a floating point intensity array in [0, 1].
///
/// The decoder is chosen from the file content, matching how
/// [`list_image_paths`] recognises frames, so the extension does not matter.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, ImageIoError> {
    let image = ImageReader::open(path.as_ref())?
        .with_guessed_format()?
        .decode()?;
    dynamic_image_to_array2(&image)
}

/// Save a [0, 1] intensity array as a 16-bit grayscale image.
///
/// Values outside [0, 1] are saturated. The format follows the file
/// extension.
pub fn save_gray16_image<P: AsRef<Path>>(image: &Array2<f64>, path: P) -> Result<(), ImageIoError> {
    let (height, width) = image.dim();

    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            let v = image[[y as usize, x as usize]].clamp(0.0, 1.0);
            Luma([(v * u16::MAX as f64).round() as u16])
        });

    buffer.save(path)?;
    Ok(())
}

/// Save an RGB image, creating the parent directory if needed.
pub fn save_rgb_image<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<(), ImageIoError> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}
