//! Image writers (SPEC_FULL.md §6 "Image outputs"): 8-bit sRGB PNG with an
//! optional alpha channel and an optional panoramic `iTXt` metadata chunk,
//! 32-bit linear TIFF, and a hand-rolled PFM writer — the three `outputMode`
//! variants a scene description can request.
//!
//! PNG/TIFF encoding reuses the teacher's `image` crate (`image_utils.rs`
//! reaches for it for decoding; here it's the encode side). The `iTXt`
//! GPano chunk and the PFM container have no equivalent in the `image`
//! crate's public API, so they are appended/written by hand, the way the
//! teacher hand-rolls its own WGSL/JSON text formats elsewhere.

use std::path::Path;

use anyhow::{Context, Result};
use image::ExtendedColorType;
use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;

/// A tonemapped, 8-bit image ready to be written to disk.
pub struct LdrImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<[u8; 3]>,
    pub alpha: Option<Vec<u8>>,
}

impl LdrImage {
    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }
}

/// Writes `image` as a PNG. When `panoramic_180` is set, a minimal
/// XMP/GPano `iTXt` chunk is appended ahead of `IEND` so downstream viewers
/// recognize the image as an equirectangular ~180° panorama.
pub fn write_png(image: &LdrImage, path: &Path, panoramic_180: bool) -> Result<()> {
    let mut bytes = encode_png(image).context("encoding PNG")?;
    if panoramic_180 {
        insert_gpano_chunk(&mut bytes, image.width, image.height);
    }
    std::fs::write(path, &bytes).with_context(|| format!("writing PNG to {}", path.display()))
}

fn encode_png(image: &LdrImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = PngEncoder::new(&mut bytes);
    match &image.alpha {
        Some(alpha) => {
            let mut rgba = Vec::with_capacity(image.rgb.len() * 4);
            for (pixel, a) in image.rgb.iter().zip(alpha) {
                rgba.extend_from_slice(&[pixel[0], pixel[1], pixel[2], *a]);
            }
            encoder.write_image(&rgba, image.width, image.height, ExtendedColorType::Rgba8)?;
        }
        None => {
            let mut rgb = Vec::with_capacity(image.rgb.len() * 3);
            for pixel in &image.rgb {
                rgb.extend_from_slice(pixel);
            }
            encoder.write_image(&rgb, image.width, image.height, ExtendedColorType::Rgb8)?;
        }
    }
    Ok(bytes)
}

/// Writes the sample buffer's linear per-pixel mean as a 3-channel IEEE-754
/// 32-bit float TIFF, row-major top-down (SPEC_FULL.md §6's `TIFF-32`).
pub fn write_tiff32(means: &[[f64; 3]], width: u32, height: u32, path: &Path) -> Result<()> {
    let mut buf = Vec::with_capacity(means.len() * 3 * 4);
    for &[r, g, b] in means {
        buf.extend_from_slice(&(r as f32).to_le_bytes());
        buf.extend_from_slice(&(g as f32).to_le_bytes());
        buf.extend_from_slice(&(b as f32).to_le_bytes());
    }
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    TiffEncoder::new(file)
        .write_image(&buf, width, height, ExtendedColorType::Rgb32F)
        .with_context(|| format!("encoding TIFF-32 to {}", path.display()))
}

/// Writes the sample buffer's linear per-pixel mean as a Portable FloatMap
/// (SPEC_FULL.md §6's `PF\n<w> <h>\n-1.0\n` header, bottom-up row order,
/// little-endian float triples — negative scale means little-endian).
pub fn write_pfm(means: &[[f64; 3]], width: u32, height: u32, path: &Path) -> Result<()> {
    let mut out = Vec::with_capacity(means.len() * 3 * 4 + 32);
    out.extend_from_slice(format!("PF\n{width} {height}\n-1.0\n").as_bytes());
    for y in (0..height).rev() {
        for x in 0..width {
            let [r, g, b] = means[(y as usize) * (width as usize) + (x as usize)];
            out.extend_from_slice(&(r as f32).to_le_bytes());
            out.extend_from_slice(&(g as f32).to_le_bytes());
            out.extend_from_slice(&(b as f32).to_le_bytes());
        }
    }
    std::fs::write(path, &out).with_context(|| format!("writing PFM to {}", path.display()))
}

/// Minimal XMP packet declaring the GPano namespace for an equirectangular
/// ~180° panorama. Only the fields viewers actually key off are populated;
/// everything else in the GPano schema is optional.
fn gpano_xmp(width: u32, height: u32) -> String {
    format!(
        "<?xpacket begin=\"\xef\xbb\xbf\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\
<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\
<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\
<rdf:Description rdf:about=\"\" xmlns:GPano=\"http://ns.google.com/photos/1.0/panorama/\">\
<GPano:ProjectionType>equirectangular</GPano:ProjectionType>\
<GPano:FullPanoWidthPixels>{width}</GPano:FullPanoWidthPixels>\
<GPano:FullPanoHeightPixels>{height}</GPano:FullPanoHeightPixels>\
<GPano:CroppedAreaImageWidthPixels>{width}</GPano:CroppedAreaImageWidthPixels>\
<GPano:CroppedAreaImageHeightPixels>{height}</GPano:CroppedAreaImageHeightPixels>\
<GPano:CroppedAreaLeftPixels>0</GPano:CroppedAreaLeftPixels>\
<GPano:CroppedAreaTopPixels>0</GPano:CroppedAreaTopPixels>\
</rdf:Description></rdf:RDF></x:xmpmeta>\
<?xpacket end=\"w\"?>"
    )
}

/// Splices an uncompressed `iTXt` chunk carrying the GPano XMP packet
/// immediately before the `IEND` chunk of an already-encoded PNG byte
/// stream.
fn insert_gpano_chunk(png: &mut Vec<u8>, width: u32, height: u32) {
    let Some(iend_offset) = find_iend_offset(png) else {
        return;
    };
    let chunk = build_itxt_chunk("XML:com.adobe.xmp", &gpano_xmp(width, height));
    png.splice(iend_offset..iend_offset, chunk);
}

/// PNG chunk framing: `u32` big-endian length, 4-byte type, `length` bytes
/// of data, `u32` big-endian CRC over (type + data). The signature is 8
/// bytes; every chunk after it follows this framing until `IEND`.
fn find_iend_offset(png: &[u8]) -> Option<usize> {
    let mut pos = 8;
    while pos + 8 <= png.len() {
        let len = u32::from_be_bytes(png[pos..pos + 4].try_into().unwrap()) as usize;
        let chunk_type = &png[pos + 4..pos + 8];
        if chunk_type == b"IEND" {
            return Some(pos);
        }
        pos += 8 + len + 4;
    }
    None
}

fn build_itxt_chunk(keyword: &str, text: &str) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(keyword.as_bytes());
    data.push(0); // keyword null terminator
    data.push(0); // compression flag: uncompressed
    data.push(0); // compression method (unused when flag is 0)
    data.push(0); // empty language tag, null terminator
    data.push(0); // empty translated keyword, null terminator
    data.extend_from_slice(text.as_bytes());

    let mut type_and_data = Vec::with_capacity(4 + data.len());
    type_and_data.extend_from_slice(b"iTXt");
    type_and_data.extend_from_slice(&data);

    let mut chunk = Vec::with_capacity(4 + type_and_data.len() + 4);
    chunk.extend_from_slice(&(data.len() as u32).to_be_bytes());
    chunk.extend_from_slice(&type_and_data);
    chunk.extend_from_slice(&crc32(&type_and_data).to_be_bytes());
    chunk
}

/// The standard CRC-32 (IEEE 802.3 / zlib) variant PNG chunks use.
fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn checker_image(width: u32, height: u32) -> LdrImage {
        let rgb = (0..width * height)
            .map(|i| if i % 2 == 0 { [255, 255, 255] } else { [0, 0, 0] })
            .collect();
        LdrImage {
            width,
            height,
            rgb,
            alpha: None,
        }
    }

    #[test]
    fn crc32_of_known_vector_matches_reference() {
        // CRC-32 of the ASCII bytes "IEND" (PNG's own trailer chunk, which
        // by the spec always has CRC 0xAE426082 regardless of data since
        // IEND carries none).
        assert_eq!(crc32(b"IEND"), 0xAE42_6082);
    }

    #[test]
    fn write_png_round_trips_through_the_image_crate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.png");
        let image = checker_image(4, 4);
        write_png(&image, &path, false).unwrap();

        let decoded = image::open(&path).unwrap().into_rgb8();
        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 4);
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(decoded.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn write_png_with_alpha_round_trips_the_alpha_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut image = checker_image(2, 2);
        image.alpha = Some(vec![255, 128, 64, 0]);
        write_png(&image, &path, false).unwrap();

        let decoded = image::open(&path).unwrap().into_rgba8();
        assert_eq!(decoded.get_pixel(0, 0).0[3], 255);
        assert_eq!(decoded.get_pixel(1, 1).0[3], 0);
    }

    #[test]
    fn panoramic_png_contains_an_itxt_gpano_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pano.png");
        write_png(&checker_image(2, 2), &path, true).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let needle = b"GPano";
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn non_panoramic_png_has_no_gpano_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.png");
        write_png(&checker_image(2, 2), &path, false).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let needle = b"GPano";
        assert!(!bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn pfm_header_and_row_order_are_correct() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.pfm");
        let means = vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0, 1.0]];
        write_pfm(&means, 2, 2, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PF\n2 2\n-1.0\n"));

        let header_len = b"PF\n2 2\n-1.0\n".len();
        let body = &bytes[header_len..];
        // Bottom-up: the PFM's first row must be the sample buffer's last
        // row, i.e. means[2] then means[3].
        let first_r = f32::from_le_bytes(body[0..4].try_into().unwrap());
        assert_eq!(first_r, 0.0);
    }

    #[test]
    fn tiff32_round_trips_through_the_image_crate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tiff");
        let means = vec![[0.5, 0.25, 0.1], [1.0, 1.0, 1.0]];
        write_tiff32(&means, 2, 1, &path).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 2);
        assert_eq!(decoded.height(), 1);
    }
}
