//! Per-pixel radiance accumulation (SPEC_FULL.md §3, "Sample buffer" /
//! "Preview framebuffer"): a row-major sum-of-samples buffer, touched by
//! exactly one worker per pixel per sample pass, plus a double-buffered
//! 32-bit ARGB preview the scheduler swaps atomically.
//!
//! The buffer carries one *global* SPP counter rather than a per-pixel one:
//! the worker pool advances every pixel by exactly one sample per pass
//! (SPEC_FULL.md §4.5), so all pixels always share the same sample count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Sum of all samples accumulated so far per pixel. The *mean* (display
/// value) is `accum / spp`; the buffer itself never stores an average, so
/// resuming a paused render is just "keep adding".
#[derive(Debug)]
pub struct SampleBuffer {
    width: u32,
    height: u32,
    accum: Vec<[f64; 3]>,
    spp: u32,
}

impl SampleBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width as usize) * (height as usize);
        SampleBuffer {
            width,
            height,
            accum: vec![[0.0; 3]; n],
            spp: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn spp(&self) -> u32 {
        self.spp
    }

    fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Adds one sample's radiance to pixel `(x, y)` within the current
    /// pass. NaN/Inf contributions are clamped to zero on write
    /// (SPEC_FULL.md §4.3's numeric policy), so a single degenerate path
    /// never poisons a pixel's running mean.
    pub fn add_sample(&mut self, x: u32, y: u32, radiance: [f64; 3]) {
        let i = self.index(x, y);
        for c in 0..3 {
            let v = radiance[c];
            self.accum[i][c] += if v.is_finite() { v } else { 0.0 };
        }
    }

    /// Called once by the manager after every pixel has received its sample
    /// for the current pass (SPEC_FULL.md §4.5 step 5).
    pub fn complete_pass(&mut self) {
        self.spp += 1;
    }

    /// Display value for a pixel: the running mean, or black if no sample
    /// has been accumulated yet.
    pub fn mean_at(&self, x: u32, y: u32) -> [f64; 3] {
        let i = self.index(x, y);
        if self.spp == 0 {
            return [0.0; 3];
        }
        let spp = self.spp as f64;
        [self.accum[i][0] / spp, self.accum[i][1] / spp, self.accum[i][2] / spp]
    }

    pub fn accum(&self) -> &[[f64; 3]] {
        &self.accum
    }

    pub fn clear(&mut self) {
        self.accum.iter_mut().for_each(|p| *p = [0.0; 3]);
        self.spp = 0;
    }

    /// Runs one sample pass over every pixel, partitioned across `threads`
    /// OS threads (SPEC_FULL.md §4.5/§5: "parallel OS threads... one pixel =
    /// one job", "each pixel is touched by exactly one worker per sample
    /// pass, so no intra-pixel lock is required"). Each thread gets a
    /// disjoint contiguous slice of the accumulator via `chunks_mut`, so the
    /// "no intra-pixel lock" guarantee is upheld by the borrow checker
    /// rather than by convention. `sample_fn(x, y, rng)` must return the
    /// pixel's single-sample radiance contribution.
    pub fn accumulate_pass(
        &mut self,
        threads: usize,
        base_seed: u64,
        sample_fn: impl Fn(u32, u32, &mut ChaCha8Rng) -> [f64; 3] + Sync,
    ) {
        let width = self.width as usize;
        let threads = threads.max(1);
        let total = self.accum.len();
        let chunk_len = total.div_ceil(threads).max(1);

        thread::scope(|scope| {
            for (chunk_index, chunk) in self.accum.chunks_mut(chunk_len).enumerate() {
                let sample_fn = &sample_fn;
                scope.spawn(move || {
                    let mut rng = ChaCha8Rng::seed_from_u64(base_seed ^ (chunk_index as u64).wrapping_add(1));
                    let base = chunk_index * chunk_len;
                    for (offset, pixel) in chunk.iter_mut().enumerate() {
                        let index = base + offset;
                        let x = (index % width) as u32;
                        let y = (index / width) as u32;
                        let radiance = sample_fn(x, y, &mut rng);
                        for c in 0..3 {
                            let v = radiance[c];
                            pixel[c] += if v.is_finite() { v } else { 0.0 };
                        }
                    }
                });
            }
        });

        self.spp += 1;
    }
}

/// Two `width × height` ARGB (packed `0xAARRGGBB`) bitmaps; only one is ever
/// mutated ("back") while readers see the other ("front"). Flipping is a
/// single atomic store, never a copy.
#[derive(Debug)]
pub struct PreviewFramebuffer {
    width: u32,
    height: u32,
    buffers: [Vec<u32>; 2],
    front_is_zero: AtomicBool,
}

impl PreviewFramebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width as usize) * (height as usize);
        PreviewFramebuffer {
            width,
            height,
            buffers: [vec![0xFF00_0000; n], vec![0xFF00_0000; n]],
            front_is_zero: AtomicBool::new(true),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn front(&self) -> &[u32] {
        if self.front_is_zero.load(Ordering::Acquire) {
            &self.buffers[0]
        } else {
            &self.buffers[1]
        }
    }

    pub fn back_mut(&mut self) -> &mut [u32] {
        if self.front_is_zero.load(Ordering::Acquire) {
            &mut self.buffers[1]
        } else {
            &mut self.buffers[0]
        }
    }

    /// Atomically makes the buffer last written through [`Self::back_mut`]
    /// the new front.
    pub fn swap(&self) {
        let was_zero = self.front_is_zero.load(Ordering::Acquire);
        self.front_is_zero.store(!was_zero, Ordering::Release);
    }
}
