//! Host-side batch containers.
//!
//! A batch is `batch` same-sized images stored back to back in one
//! contiguous row-major buffer of 8-bit samples. The input carries three
//! interleaved samples per pixel, the edge map carries one.

use crate::{ComputeError, ComputeResult};

/// Samples per pixel in the input and blurred buffers.
pub const RGB_CHANNELS: u32 = 3;
/// Samples per pixel in the grayscale and output buffers.
pub const GRAY_CHANNELS: u32 = 1;

/// Dimensions of a batch: `batch` images of `width x height` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchShape {
    pub width: u32,
    pub height: u32,
    pub batch: u32,
}

impl BatchShape {
    /// Validated shape; every extent must be non-zero.
    pub fn new(width: u32, height: u32, batch: u32) -> ComputeResult<Self> {
        if width == 0 || height == 0 || batch == 0 {
            return Err(ComputeError::InvalidDimensions { width, height, batch });
        }
        Ok(Self { width, height, batch })
    }

    /// Pixels in one image.
    #[inline]
    pub fn pixels_per_image(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Pixels in the whole batch.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.pixels_per_image() * (self.batch as usize)
    }

    /// Buffer length in samples for the whole batch.
    #[inline]
    pub fn buffer_len(&self, channels: u32) -> usize {
        self.pixel_count() * (channels as usize)
    }

    /// Same image size, batch of one.
    pub fn single(&self) -> Self {
        Self { batch: 1, ..*self }
    }
}

/// Batch of RGB8 images (pipeline input).
#[derive(Clone)]
pub struct ImageBatch {
    data: Vec<u8>,
    shape: BatchShape,
}

impl ImageBatch {
    /// Wrap interleaved RGB8 data; length must be `width * height * batch * 3`.
    pub fn from_rgb8(data: Vec<u8>, width: u32, height: u32, batch: u32) -> ComputeResult<Self> {
        let shape = BatchShape::new(width, height, batch)?;
        let expected = shape.buffer_len(RGB_CHANNELS);
        if data.len() != expected {
            return Err(ComputeError::BufferSizeMismatch { expected, actual: data.len() });
        }
        Ok(Self { data, shape })
    }

    /// Concatenate separate RGB8 images of identical size.
    pub fn from_images<I>(images: I, width: u32, height: u32) -> ComputeResult<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let per_image = (width as usize) * (height as usize) * (RGB_CHANNELS as usize);
        let mut data = Vec::new();
        let mut count = 0u32;
        for image in images {
            let image = image.as_ref();
            if image.len() != per_image {
                return Err(ComputeError::BufferSizeMismatch { expected: per_image, actual: image.len() });
            }
            data.extend_from_slice(image);
            count += 1;
        }
        Self::from_rgb8(data, width, height, count)
    }

    /// Batch where every pixel of every image is `rgb`.
    pub fn filled(shape: BatchShape, rgb: [u8; 3]) -> Self {
        let data = rgb.repeat(shape.pixel_count());
        Self { data, shape }
    }

    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    /// Raw interleaved samples.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel view of the whole batch.
    pub fn pixels(&self) -> &[[u8; 3]] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn pixels_mut(&mut self) -> &mut [[u8; 3]] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// Samples of image `z`.
    pub fn image(&self, z: u32) -> &[u8] {
        let len = self.shape.pixels_per_image() * RGB_CHANNELS as usize;
        let start = z as usize * len;
        &self.data[start..start + len]
    }

    /// Iterate images in batch order.
    pub fn images(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.shape.pixels_per_image() * RGB_CHANNELS as usize)
    }

    /// Pixel at `(x, y)` of image `z`.
    pub fn pixel(&self, x: u32, y: u32, z: u32) -> [u8; 3] {
        let idx = z as usize * self.shape.pixels_per_image()
            + (y as usize) * (self.shape.width as usize)
            + x as usize;
        self.pixels()[idx]
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for ImageBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBatch")
            .field("width", &self.shape.width)
            .field("height", &self.shape.height)
            .field("batch", &self.shape.batch)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Batch of 1-channel edge maps (pipeline output).
#[derive(Clone)]
pub struct EdgeMapBatch {
    data: Vec<u8>,
    shape: BatchShape,
}

impl EdgeMapBatch {
    /// Zero-filled output sized for `shape`.
    pub fn new(shape: BatchShape) -> Self {
        Self {
            data: vec![0; shape.buffer_len(GRAY_CHANNELS)],
            shape,
        }
    }

    /// Wrap 1-channel data; length must be `width * height * batch`.
    pub fn from_gray8(data: Vec<u8>, shape: BatchShape) -> ComputeResult<Self> {
        let expected = shape.buffer_len(GRAY_CHANNELS);
        if data.len() != expected {
            return Err(ComputeError::BufferSizeMismatch { expected, actual: data.len() });
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Edge map of image `z`.
    pub fn image(&self, z: u32) -> &[u8] {
        let len = self.shape.pixels_per_image();
        let start = z as usize * len;
        &self.data[start..start + len]
    }

    pub fn images(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.shape.pixels_per_image())
    }

    /// Magnitude at `(x, y)` of image `z`.
    pub fn get(&self, x: u32, y: u32, z: u32) -> u8 {
        self.image(z)[(y as usize) * (self.shape.width as usize) + x as usize]
    }

    /// Size in bytes; always `width * height * batch`.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for EdgeMapBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeMapBatch")
            .field("width", &self.shape.width)
            .field("height", &self.shape.height)
            .field("batch", &self.shape.batch)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_rejects_zero() {
        assert!(BatchShape::new(0, 4, 1).is_err());
        assert!(BatchShape::new(4, 0, 1).is_err());
        assert!(BatchShape::new(4, 4, 0).is_err());
        let shape = BatchShape::new(4, 3, 2).unwrap();
        assert_eq!(shape.buffer_len(RGB_CHANNELS), 4 * 3 * 2 * 3);
        assert_eq!(shape.single().batch, 1);
    }

    #[test]
    fn test_from_rgb8_checks_length() {
        let err = ImageBatch::from_rgb8(vec![0; 10], 2, 2, 1).unwrap_err();
        assert!(matches!(err, ComputeError::BufferSizeMismatch { expected: 12, actual: 10 }));
    }

    #[test]
    fn test_from_images_concatenates() {
        let a = vec![1u8; 2 * 2 * 3];
        let b = vec![2u8; 2 * 2 * 3];
        let batch = ImageBatch::from_images([&a, &b], 2, 2).unwrap();
        assert_eq!(batch.shape().batch, 2);
        assert_eq!(batch.image(0), &a[..]);
        assert_eq!(batch.image(1), &b[..]);
        assert_eq!(batch.pixel(1, 1, 1), [2, 2, 2]);
    }

    #[test]
    fn test_from_images_rejects_mismatched_image() {
        let a = vec![1u8; 12];
        let b = vec![2u8; 9];
        assert!(ImageBatch::from_images([a, b], 2, 2).is_err());
    }

    #[test]
    fn test_edge_map_views() {
        let shape = BatchShape::new(3, 2, 2).unwrap();
        let data: Vec<u8> = (0..12).collect();
        let map = EdgeMapBatch::from_gray8(data, shape).unwrap();
        assert_eq!(map.image(1), &[6, 7, 8, 9, 10, 11]);
        assert_eq!(map.get(2, 1, 0), 5);
        assert_eq!(map.images().count(), 2);
    }
}
