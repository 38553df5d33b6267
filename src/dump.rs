//! The render-dump persistence format (SPEC_FULL.md §4.6 / §6): a versioned,
//! big-endian encoding of the sample buffer's per-pixel mean radiance, plus
//! a reader for the legacy gzip-compressed format it replaces. Dispatch
//! between the two peeks the first bytes of the stream rather than trusting
//! a file extension.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::warn;

use crate::error::{RenderError, Result};
use crate::sample_buffer::SampleBuffer;

const MAGIC: &[u8; 4] = b"DUMP";
const CURRENT_VERSION: u32 = 1;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A dump's body stores the per-pixel *mean* radiance (not the raw sum),
/// alongside the single global SPP count it was divided by, so that
/// [`merge`] can recombine two dumps as a weighted mean without needing the
/// original per-pixel sums.
#[derive(Debug, Clone, PartialEq)]
pub struct Dump {
    pub width: u32,
    pub height: u32,
    pub spp: u32,
    pub render_time_ms: i64,
    pub means: Vec<[f64; 3]>,
}

impl Dump {
    pub fn from_sample_buffer(buffer: &SampleBuffer, render_time_ms: i64) -> Self {
        let means = (0..buffer.height())
            .flat_map(|y| (0..buffer.width()).map(move |x| (x, y)))
            .map(|(x, y)| buffer.mean_at(x, y))
            .collect();
        Dump {
            width: buffer.width(),
            height: buffer.height(),
            spp: buffer.spp(),
            render_time_ms,
            means,
        }
    }

    /// Writes this dump's accumulated samples into `buffer`, which must
    /// already have matching dimensions. `buffer` must be freshly cleared —
    /// this reconstructs sums as `mean * spp` and assumes no prior samples.
    pub fn write_into(&self, buffer: &mut SampleBuffer) -> Result<()> {
        if (buffer.width(), buffer.height()) != (self.width, self.height) {
            return Err(RenderError::DumpDimensionMismatch {
                expected_w: buffer.width(),
                expected_h: buffer.height(),
                found_w: self.width,
                found_h: self.height,
            });
        }
        let spp = self.spp as f64;
        for y in 0..self.height {
            for x in 0..self.width {
                let i = (y as usize) * (self.width as usize) + (x as usize);
                let mean = self.means[i];
                buffer.add_sample(x, y, [mean[0] * spp, mean[1] * spp, mean[2] * spp]);
            }
        }
        for _ in 0..self.spp {
            buffer.complete_pass();
        }
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        for pixel in &self.means {
            for c in pixel {
                out.extend_from_slice(&c.to_be_bytes());
            }
        }
    }

    fn read_body(width: u32, height: u32, bytes: &[u8]) -> Result<Vec<[f64; 3]>> {
        let n = (width as usize) * (height as usize);
        const STRIDE: usize = 8 * 3;
        if bytes.len() < n * STRIDE {
            return Err(RenderError::DumpFormatUnrecognized);
        }
        let mut means = Vec::with_capacity(n);
        for chunk in bytes[..n * STRIDE].chunks_exact(STRIDE) {
            let r = f64::from_be_bytes(chunk[0..8].try_into().unwrap());
            let g = f64::from_be_bytes(chunk[8..16].try_into().unwrap());
            let b = f64::from_be_bytes(chunk[16..24].try_into().unwrap());
            means.push([r, g, b]);
        }
        Ok(means)
    }
}

/// Combines two dumps of matching dimensions into a weighted mean:
/// `out = (spp_A·A + spp_B·B) / (spp_A + spp_B)`, `spp_out = spp_A + spp_B`,
/// `time_out = time_A + time_B` (SPEC_FULL.md §4.6).
pub fn merge(a: &Dump, b: &Dump) -> Result<Dump> {
    if (a.width, a.height) != (b.width, b.height) {
        return Err(RenderError::DumpDimensionMismatch {
            expected_w: a.width,
            expected_h: a.height,
            found_w: b.width,
            found_h: b.height,
        });
    }
    let total_spp = a.spp + b.spp;
    let (wa, wb) = if total_spp == 0 {
        (0.0, 0.0)
    } else {
        (a.spp as f64 / total_spp as f64, b.spp as f64 / total_spp as f64)
    };
    let means = a
        .means
        .iter()
        .zip(&b.means)
        .map(|(ma, mb)| [ma[0] * wa + mb[0] * wb, ma[1] * wa + mb[1] * wb, ma[2] * wa + mb[2] * wb])
        .collect();

    Ok(Dump {
        width: a.width,
        height: a.height,
        spp: total_spp,
        render_time_ms: a.render_time_ms + b.render_time_ms,
        means,
    })
}

/// Serializes into the current versioned format: a plain (uncompressed)
/// `DUMP` header so a reader can dispatch format without decompressing,
/// followed by the pixel body.
pub fn serialize(dump: &Dump) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&CURRENT_VERSION.to_be_bytes());
    out.extend_from_slice(&dump.width.to_be_bytes());
    out.extend_from_slice(&dump.height.to_be_bytes());
    out.extend_from_slice(&dump.spp.to_be_bytes());
    out.extend_from_slice(&dump.render_time_ms.to_be_bytes());
    dump.write_body(&mut out);
    out
}

/// Deserializes either the current versioned format or the legacy
/// gzip-compressed format (no magic, no version — `width, height, spp,
/// renderTime` followed by the pixel body, all gzip-compressed).
pub fn deserialize(bytes: &[u8]) -> Result<Dump> {
    if bytes.len() >= 4 && &bytes[0..4] == MAGIC {
        return deserialize_current(bytes);
    }
    if bytes.len() >= 2 && bytes[0..2] == GZIP_MAGIC {
        warn!("reading a legacy gzip-format render dump");
        return deserialize_legacy(bytes);
    }
    Err(RenderError::DumpFormatUnrecognized)
}

const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 4 + 8; // magic, version, w, h, spp, time

fn deserialize_current(bytes: &[u8]) -> Result<Dump> {
    if bytes.len() < HEADER_LEN {
        return Err(RenderError::DumpFormatUnrecognized);
    }
    let version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if version != CURRENT_VERSION {
        return Err(RenderError::UnsupportedDumpVersion(version));
    }
    let width = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let height = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
    let spp = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
    let render_time_ms = i64::from_be_bytes(bytes[20..28].try_into().unwrap());
    let means = Dump::read_body(width, height, &bytes[28..])?;
    Ok(Dump {
        width,
        height,
        spp,
        render_time_ms,
        means,
    })
}

const LEGACY_HEADER_LEN: usize = 4 + 4 + 4 + 8; // w, h, spp, time

fn deserialize_legacy(bytes: &[u8]) -> Result<Dump> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|_| RenderError::DumpFormatUnrecognized)?;
    if raw.len() < LEGACY_HEADER_LEN {
        return Err(RenderError::DumpFormatUnrecognized);
    }
    let width = u32::from_be_bytes(raw[0..4].try_into().unwrap());
    let height = u32::from_be_bytes(raw[4..8].try_into().unwrap());
    let spp = u32::from_be_bytes(raw[8..12].try_into().unwrap());
    let render_time_ms = i64::from_be_bytes(raw[12..20].try_into().unwrap());
    let means = Dump::read_body(width, height, &raw[20..])?;
    Ok(Dump {
        width,
        height,
        spp,
        render_time_ms,
        means,
    })
}

/// Encodes a dump in the legacy gzip format — used only by tests exercising
/// scenario §8.3 (legacy-dump read), since new writes always use the
/// current format.
pub fn serialize_legacy(dump: &Dump) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&dump.width.to_be_bytes());
    raw.extend_from_slice(&dump.height.to_be_bytes());
    raw.extend_from_slice(&dump.spp.to_be_bytes());
    raw.extend_from_slice(&dump.render_time_ms.to_be_bytes());
    dump.write_body(&mut raw);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).expect("writing to an in-memory buffer cannot fail");
    encoder.finish().expect("gzip finish on in-memory buffer cannot fail")
}
