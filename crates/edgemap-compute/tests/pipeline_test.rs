//! End-to-end pipeline properties on the CPU backend.

use edgemap_compute::backend::{CpuPrimitives, DeviceBuffer, GpuPrimitives, LaunchGeometry};
use edgemap_compute::stages::luma;
use edgemap_compute::{
    Backend, BatchShape, EdgeMode, EdgeProcessor, GaussianWeights, ImageBatch, Pipeline, PipelineConfig,
    SobelNorm, SobelWeights, Stage, WeightKind,
};

/// Deterministic pseudo-random samples.
fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

fn cpu_processor(config: PipelineConfig) -> EdgeProcessor {
    EdgeProcessor::new(Backend::Cpu, config).unwrap()
}

// ============================================================================
// Full-image reference (clamp to image bounds, no tiling)
// ============================================================================

fn clamp_at(v: i64, n: usize) -> usize {
    v.clamp(0, n as i64 - 1) as usize
}

fn reference_gaussian(src: &[u8], w: usize, h: usize, weights: &[f32]) -> Vec<u8> {
    let r = (weights.len() / 2) as i64;
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            let mut norm = 0.0f32;
            for dy in -r..=r {
                let wy = weights[(r + dy) as usize];
                for dx in -r..=r {
                    let wt = weights[(r + dx) as usize] * wy;
                    let sx = clamp_at(x as i64 + dx, w);
                    let sy = clamp_at(y as i64 + dy, h);
                    let px = &src[(sy * w + sx) * 3..(sy * w + sx) * 3 + 3];
                    acc[0] += wt * px[0] as f32;
                    acc[1] += wt * px[1] as f32;
                    acc[2] += wt * px[2] as f32;
                    norm += wt;
                }
            }
            for c in 0..3 {
                out[(y * w + x) * 3 + c] = (acc[c] / norm).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

fn reference_sobel(src: &[u8], w: usize, h: usize) -> Vec<u8> {
    let sobel = SobelWeights::standard();
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let (mut gx, mut gy) = (0i32, 0i32);
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let p = src[clamp_at(y as i64 + dy, h) * w + clamp_at(x as i64 + dx, w)] as i32;
                    gx += sobel.x[(dy + 1) as usize][(dx + 1) as usize] * p;
                    gy += sobel.y[(dy + 1) as usize][(dx + 1) as usize] * p;
                }
            }
            out[y * w + x] = (gx.abs() + gy.abs()).min(255) as u8;
        }
    }
    out
}

fn reference_pipeline(image: &[u8], w: usize, h: usize, radius: u32, sigma: f32) -> Vec<u8> {
    let weights = GaussianWeights::new(sigma, radius).unwrap();
    let blurred = reference_gaussian(image, w, h, weights.as_slice());
    let gray: Vec<u8> = blurred.chunks_exact(3).map(|p| luma(p[0], p[1], p[2])).collect();
    reference_sobel(&gray, w, h)
}

// ============================================================================
// Stage-level properties
// ============================================================================

#[test]
fn test_flat_image_survives_gaussian_exactly() {
    // radius 3, spread 1.0 on a flat 8x8 image of 100
    let gpu = CpuPrimitives::new();
    let shape = BatchShape::new(8, 8, 1).unwrap();
    let weights = GaussianWeights::new(1.0, 3).unwrap();
    let handle = gpu.upload_weights(WeightKind::Gaussian, weights.as_slice()).unwrap();

    let mut src = gpu.allocate(shape, 3).unwrap();
    gpu.upload(&mut src, &[100; 8 * 8 * 3]).unwrap();
    let mut dst = gpu.allocate(shape, 3).unwrap();

    for tile in [(16, 16), (4, 4), (3, 5)] {
        let launch = LaunchGeometry::plan(shape, tile, 3, 3, EdgeMode::Image, gpu.limits()).unwrap();
        gpu.exec_gaussian(&src, &mut dst, &handle, &launch).unwrap();
        gpu.synchronize(Stage::Gaussian).unwrap();
        assert!(gpu.download_vec(&dst).unwrap().iter().all(|&v| v == 100), "tile {tile:?}");
    }
}

#[test]
fn test_grayscale_is_floor_of_luma() {
    for r in 0..=255u8 {
        for g in 0..=255u8 {
            for b in 0..=255u8 {
                let exact = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
                // Exact values have three decimals; the epsilon absorbs f64 error only.
                let expected = (exact + 1e-9).floor() as u8;
                assert_eq!(luma(r, g, b), expected, "({r},{g},{b})");
            }
        }
    }
}

#[test]
fn test_grayscale_stage_matches_luma() {
    let gpu = CpuPrimitives::new();
    let shape = BatchShape::new(256, 256, 2).unwrap();
    let mut rgb = Vec::with_capacity(shape.buffer_len(3));
    for z in 0..2u32 {
        for y in 0..256u32 {
            for x in 0..256u32 {
                rgb.extend_from_slice(&[x as u8, y as u8, (z * 255) as u8]);
            }
        }
    }

    let mut src = gpu.allocate(shape, 3).unwrap();
    gpu.upload(&mut src, &rgb).unwrap();
    let mut dst = gpu.allocate(shape, 1).unwrap();
    let launch = LaunchGeometry::plan(shape, (16, 16), 0, 3, EdgeMode::Image, gpu.limits()).unwrap();
    gpu.exec_grayscale(&src, &mut dst, &launch).unwrap();
    gpu.synchronize(Stage::Grayscale).unwrap();

    let gray = gpu.download_vec(&dst).unwrap();
    for (i, p) in rgb.chunks_exact(3).enumerate() {
        assert_eq!(gray[i], luma(p[0], p[1], p[2]));
    }
}

fn sobel_only(image: &[u8], w: u32, h: u32, mode: EdgeMode, tile: (u32, u32)) -> Vec<u8> {
    let gpu = CpuPrimitives::new();
    let shape = BatchShape::new(w, h, 1).unwrap();
    let weights = gpu.upload_weights(WeightKind::Sobel, &SobelWeights::standard().to_coefficients()).unwrap();
    let mut src = gpu.allocate(shape, 1).unwrap();
    gpu.upload(&mut src, image).unwrap();
    let mut dst = gpu.allocate(shape, 1).unwrap();
    let launch = LaunchGeometry::plan(shape, tile, 1, 1, mode, gpu.limits()).unwrap();
    gpu.exec_sobel(&src, &mut dst, &weights, SobelNorm::L1, &launch).unwrap();
    gpu.synchronize(Stage::Sobel).unwrap();
    gpu.download_vec(&dst).unwrap()
}

#[test]
fn test_uniform_gray_has_no_edges() {
    let out = sobel_only(&[77; 9 * 7], 9, 7, EdgeMode::Image, (4, 4));
    assert!(out.iter().all(|&v| v == 0));
}

#[test]
fn test_single_bright_pixel() {
    let mut image = vec![0u8; 16];
    image[2 * 4 + 2] = 255;
    let out = sobel_only(&image, 4, 4, EdgeMode::Image, (16, 16));

    for y in 0..4i32 {
        for x in 0..4i32 {
            let v = out[(y * 4 + x) as usize];
            let neighbor = (x - 2).abs() <= 1 && (y - 2).abs() <= 1 && (x, y) != (2, 2);
            if neighbor {
                assert!(v > 0, "expected edge at ({x},{y})");
            } else {
                assert_eq!(v, 0, "unexpected edge at ({x},{y})");
            }
        }
    }
    // Corner neighbors see both gradients: |255| + |255| saturates
    assert_eq!(out[4 + 1], 255);
}

// ============================================================================
// Whole pipeline
// ============================================================================

#[test]
fn test_uniform_color_batch_is_all_zero() {
    let proc = cpu_processor(PipelineConfig::default());
    let batch = ImageBatch::filled(BatchShape::new(20, 12, 3).unwrap(), [200, 40, 90]);
    let edges = proc.run(&batch).unwrap();
    assert!(edges.data().iter().all(|&v| v == 0));
}

#[test]
fn test_output_size_is_one_byte_per_pixel() {
    let proc = cpu_processor(PipelineConfig::default());
    for (w, h, n) in [(1, 1, 1), (7, 3, 2), (33, 17, 4)] {
        let batch = ImageBatch::from_rgb8(noise(w * h * n * 3, 1), w as u32, h as u32, n as u32).unwrap();
        let edges = proc.run(&batch).unwrap();
        assert_eq!(edges.size_bytes(), w * h * n);
        assert_eq!(edges.shape(), batch.shape());
    }
}

#[test]
fn test_batch_invariance() {
    let (w, h) = (23u32, 19u32);
    let images: Vec<Vec<u8>> = (0..4).map(|s| noise((w * h * 3) as usize, s)).collect();
    let batch = ImageBatch::from_images(&images, w, h).unwrap();

    for tile in [(16, 16), (8, 4), (5, 7)] {
        let proc = cpu_processor(PipelineConfig::default().with_tile(tile.0, tile.1));
        let edges = proc.run(&batch).unwrap();
        for (z, image) in images.iter().enumerate() {
            let alone = proc.run(&ImageBatch::from_rgb8(image.clone(), w, h, 1).unwrap()).unwrap();
            assert_eq!(edges.image(z as u32), alone.data(), "image {z}, tile {tile:?}");
        }
    }
}

#[test]
fn test_image_mode_matches_full_image_reference() {
    let (w, h) = (21usize, 14usize);
    let image = noise(w * h * 3, 7);
    let batch = ImageBatch::from_rgb8(image.clone(), w as u32, h as u32, 1).unwrap();
    let reference = reference_pipeline(&image, w, h, 3, 1.0);

    for tile in [(16, 16), (4, 4), (3, 2), (1, 1), (32, 8)] {
        let proc = cpu_processor(PipelineConfig::default().with_tile(tile.0, tile.1));
        let edges = proc.run(&batch).unwrap();
        assert_eq!(edges.data(), &reference[..], "tile {tile:?}");
    }
}

#[test]
fn test_block_mode_seam_differs_from_reference() {
    // Horizontal ramp: any clamp inside the image flattens the gradient.
    let (w, h) = (12usize, 8usize);
    let image: Vec<u8> = (0..w * h).flat_map(|i| [(i % w * 20) as u8; 3]).collect();
    let batch = ImageBatch::from_rgb8(image.clone(), w as u32, h as u32, 1).unwrap();
    let reference = reference_pipeline(&image, w, h, 3, 1.0);

    let config = PipelineConfig::default().with_tile(4, 4);
    let block = cpu_processor(config.clone().with_edge_mode(EdgeMode::Block)).run(&batch).unwrap();
    let fixed = cpu_processor(config.with_edge_mode(EdgeMode::Image)).run(&batch).unwrap();

    assert_eq!(fixed.data(), &reference[..]);
    assert_ne!(block.data(), &reference[..]);
    // x = 3 is the last column of the first block: the seam sits there
    for y in 1..h - 1 {
        assert_ne!(block.get(3, y as u32, 0), reference[y * w + 3], "row {y}");
    }
}

#[test]
fn test_narrow_sigma_behaves_as_no_blur() {
    // Off-center weights underflow to zero; the step must still come through.
    let (w, h) = (8u32, 8u32);
    let image: Vec<u8> = (0..w * h).flat_map(|i| [if i % w >= 4 { 200 } else { 0 }; 3]).collect();
    let batch = ImageBatch::from_rgb8(image, w, h, 1).unwrap();

    let narrow = cpu_processor(PipelineConfig::default().with_gaussian(3, 1e-3)).run(&batch).unwrap();
    let unblurred = cpu_processor(PipelineConfig::default().with_gaussian(0, 1.0)).run(&batch).unwrap();

    assert_eq!(narrow.data(), unblurred.data());
    for y in 0..h {
        assert_eq!(&narrow.image(0)[(y * w) as usize..((y + 1) * w) as usize], &[0, 0, 0, 255, 255, 0, 0, 0]);
    }
}

#[test]
fn test_l2_norm_never_exceeds_l1() {
    let batch = ImageBatch::from_rgb8(noise(16 * 16 * 3, 3), 16, 16, 1).unwrap();
    let l1 = cpu_processor(PipelineConfig::default()).run(&batch).unwrap();
    let l2 = cpu_processor(PipelineConfig::default().with_sobel_norm(SobelNorm::L2)).run(&batch).unwrap();
    assert!(l1.data().iter().zip(l2.data()).all(|(a, b)| a >= b));
}

#[test]
fn test_run_into_reuses_host_buffer() {
    let proc = cpu_processor(PipelineConfig::default());
    let batch = ImageBatch::from_rgb8(noise(10 * 10 * 3 * 2, 9), 10, 10, 2).unwrap();
    let mut out = vec![0xAA; 200];
    proc.run_into(&batch, &mut out).unwrap();
    assert_eq!(out, proc.run(&batch).unwrap().into_inner());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_pipelines_share_backend() {
    use std::sync::Arc;

    let gpu = Arc::new(CpuPrimitives::new());
    let narrow = Pipeline::with_shared(Arc::clone(&gpu), PipelineConfig::default().with_gaussian(1, 0.5)).unwrap();
    let wide = Pipeline::with_shared(Arc::clone(&gpu), PipelineConfig::default().with_gaussian(6, 2.5)).unwrap();
    let batch = ImageBatch::from_rgb8(noise(24 * 24 * 3 * 2, 11), 24, 24, 2).unwrap();

    let expected_narrow = narrow.run(&batch).unwrap();
    let expected_wide = wide.run(&batch).unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| assert_eq!(narrow.run(&batch).unwrap().data(), expected_narrow.data()));
            s.spawn(|| assert_eq!(wide.run(&batch).unwrap().data(), expected_wide.data()));
        }
    });
    assert_ne!(expected_narrow.data(), expected_wide.data());
}

#[test]
fn test_weight_handles_are_independent() {
    let gpu = CpuPrimitives::new();
    let a = gpu.upload_weights(WeightKind::Gaussian, GaussianWeights::new(1.0, 1).unwrap().as_slice()).unwrap();
    let b = gpu.upload_weights(WeightKind::Gaussian, GaussianWeights::new(2.0, 4).unwrap().as_slice()).unwrap();
    assert_eq!(a.as_slice().len(), 3);
    assert_eq!(b.as_slice().len(), 9);

    let shape = BatchShape::new(4, 4, 1).unwrap();
    let buf = gpu.allocate(shape, 1).unwrap();
    assert_eq!(buf.len(), 16);
}
