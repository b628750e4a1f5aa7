//! # Image Processing Module
//!
//! Questo modulo gestisce la compressione di JPEG e PNG verso budget di
//! dimensione molto stretti, tutto in-process con il crate `image`.
//!
//! ## Pipeline di Ottimizzazione
//!
//! 1. **Decodifica**: formato rilevato dal contenuto del file, non solo dall'estensione
//! 2. **Resize**: solo se `width > max_width`, Lanczos3, aspect ratio preservato
//!    (`height = floor(h * max_width / w)`); mai upscaling
//! 3. **Ricodifica** in base all'estensione sorgente:
//!    - JPEG/JPG: alpha rimosso (RGB opaco), qualità `jpeg_quality`
//!    - PNG: RGBA, palette adattiva NeuQuant di `png_colors` colori,
//!      PNG indicizzato con bit depth minimo e compressione massima
//! 4. **Scrittura** nel path speculare sotto la root di output
//!
//! ## Formati Supportati
//!
//! | Formato | Output                       |
//! |---------|------------------------------|
//! | JPEG    | JPEG baseline RGB            |
//! | PNG     | PNG palette (1/2/4/8 bit) + tRNS |
//! | Altri   | Errore (lo scanner non li classifica come immagine) |
//!
//! La riduzione a pochi colori è lossy per scelta: serve a rispettare il budget.
//!
//! ## Error Handling
//!
//! - **File corrotto / formato sconosciuto**: `OptimizeError::Decode`
//! - **Errore di scrittura**: `OptimizeError::Encode`, il file parziale viene rimosso
//! - La batch non si interrompe mai per un singolo file: il chiamante registra e continua

use crate::config::Config;
use crate::error::OptimizeError;
use crate::file_manager::AssetFile;
use crate::optimizer::path_resolver::OptimizationTarget;
use crate::optimizer::pipeline::KeepAlive;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// NeuQuant sampling factor: 1 is slowest/best, 30 fastest
const NEUQUANT_SAMPLE_FACTOR: i32 = 10;

/// Output encoding chosen from the source extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageEncoding {
    Jpeg,
    Png,
}

impl ImageEncoding {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

/// Resizes and re-encodes a single image asset
#[derive(Clone)]
pub struct ImageOptimizer {
    config: Arc<Config>,
    keep_alive: Option<KeepAlive>,
}

impl ImageOptimizer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config, keep_alive: None }
    }

    /// Handle moved into each blocking job, released when the job returns
    pub fn with_keep_alive(mut self, keep_alive: Option<KeepAlive>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Optimize `asset` into `dest_root/<relative path>`.
    ///
    /// Returns the size in bytes of the written file. Directory creation,
    /// decoding and encoding all run inside one blocking job, which keeps
    /// running to completion even if the calling task is aborted.
    pub async fn optimize(&self, asset: &AssetFile, dest_root: &Path) -> Result<u64, OptimizeError> {
        let target = OptimizationTarget::new(asset.clone(), dest_root)?;
        let config = Arc::clone(&self.config);
        let keep_alive = self.keep_alive.clone();

        tokio::task::spawn_blocking(move || {
            let _keep_alive = keep_alive;
            target.prepare()?;
            Self::optimize_blocking(&target.source.path, &target.source.extension, &target.destination, &config)
        })
        .await
        .map_err(|e| OptimizeError::Encode(format!("Image worker failed: {}", e)))?
    }

    /// Synchronous core of [`ImageOptimizer::optimize`]
    pub fn optimize_blocking(
        source: &Path,
        extension: &str,
        destination: &Path,
        config: &Config,
    ) -> Result<u64, OptimizeError> {
        let encoding = ImageEncoding::from_extension(extension).ok_or_else(|| {
            OptimizeError::Decode(format!("Not a JPEG or PNG asset: .{}", extension))
        })?;

        let img = Self::decode(source)?;
        let (width, height) = (img.width(), img.height());

        let img = match Self::target_dimensions(width, height, config.max_width) {
            Some((new_width, new_height)) => {
                debug!(
                    "Resizing {} from {}x{} to {}x{}",
                    source.display(),
                    width,
                    height,
                    new_width,
                    new_height
                );
                img.resize_exact(new_width, new_height, FilterType::Lanczos3)
            }
            None => img,
        };

        let written = match encoding {
            ImageEncoding::Jpeg => Self::write_jpeg(&img, destination, config.jpeg_quality),
            ImageEncoding::Png => Self::write_png(&img, destination, config.png_colors as usize),
        };

        if let Err(e) = written {
            // Never leave a half-written output without a valid source behind
            let _ = std::fs::remove_file(destination);
            return Err(e);
        }

        let size = std::fs::metadata(destination)
            .map_err(|e| OptimizeError::filesystem("Cannot stat output", destination, e))?
            .len();
        Ok(size)
    }

    fn decode(source: &Path) -> Result<DynamicImage, OptimizeError> {
        image::io::Reader::open(source)
            .map_err(|e| OptimizeError::filesystem("Cannot open image", source, e))?
            .with_guessed_format()
            .map_err(|e| OptimizeError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| OptimizeError::Decode(e.to_string()))
    }

    /// New size for an image, or `None` when it already fits.
    ///
    /// Width becomes exactly `max_width`; height is floored and never below 1.
    pub fn target_dimensions(width: u32, height: u32, max_width: u32) -> Option<(u32, u32)> {
        if width <= max_width {
            return None;
        }
        let new_height = (u64::from(height) * u64::from(max_width) / u64::from(width)) as u32;
        Some((max_width, new_height.max(1)))
    }

    fn write_jpeg(img: &DynamicImage, destination: &Path, quality: u8) -> Result<(), OptimizeError> {
        let rgb = img.to_rgb8();
        let file = File::create(destination)
            .map_err(|e| OptimizeError::filesystem("Cannot create", destination, e))?;
        let mut writer = BufWriter::new(file);

        JpegEncoder::new_with_quality(&mut writer, quality)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
            .map_err(|e| OptimizeError::Encode(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    fn write_png(img: &DynamicImage, destination: &Path, colors: usize) -> Result<(), OptimizeError> {
        let file = File::create(destination)
            .map_err(|e| OptimizeError::filesystem("Cannot create", destination, e))?;
        Self::encode_png(img, colors, BufWriter::new(file))
    }

    /// Quantize `img` and write it as an indexed PNG, flushing `out` at the end
    fn encode_png<W: Write>(img: &DynamicImage, colors: usize, mut out: W) -> Result<(), OptimizeError> {
        let rgba = img.to_rgba8();
        let quantized = Quantized::from_rgba(&rgba, colors);
        let depth = bit_depth_for(quantized.palette_len());
        let packed = pack_indices(&quantized.indices, rgba.width() as usize, depth);

        let mut encoder = png::Encoder::new(&mut out, rgba.width(), rgba.height());
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(depth);
        encoder.set_palette(quantized.palette);
        if let Some(trns) = quantized.trns {
            encoder.set_trns(trns);
        }
        encoder.set_compression(png::Compression::Best);
        encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);

        let encode_err = |e: png::EncodingError| OptimizeError::Encode(e.to_string());
        let mut writer = encoder.write_header().map_err(encode_err)?;
        writer.write_image_data(&packed).map_err(encode_err)?;
        writer.finish().map_err(encode_err)?;
        out.flush()?;
        Ok(())
    }
}

/// An RGBA image reduced to a palette
struct Quantized {
    /// RGB triples (PLTE)
    palette: Vec<u8>,
    /// Per-entry alpha (tRNS), None when every entry is opaque
    trns: Option<Vec<u8>>,
    /// One palette index per pixel, row-major
    indices: Vec<u8>,
}

impl Quantized {
    fn from_rgba(rgba: &RgbaImage, colors: usize) -> Self {
        let quantizer = color_quant::NeuQuant::new(NEUQUANT_SAMPLE_FACTOR, colors, rgba.as_raw());
        let map = quantizer.color_map_rgba();

        let mut palette = Vec::with_capacity(map.len() / 4 * 3);
        let mut alpha = Vec::with_capacity(map.len() / 4);
        for entry in map.chunks_exact(4) {
            palette.extend_from_slice(&entry[..3]);
            alpha.push(entry[3]);
        }

        let indices = rgba
            .as_raw()
            .chunks_exact(4)
            .map(|px| quantizer.index_of(px) as u8)
            .collect();

        // Trailing opaque entries can be dropped from tRNS
        while alpha.last() == Some(&255) {
            alpha.pop();
        }
        let trns = if alpha.is_empty() { None } else { Some(alpha) };

        Self { palette, trns, indices }
    }

    fn palette_len(&self) -> usize {
        self.palette.len() / 3
    }
}

/// Smallest PNG bit depth able to address `palette_len` entries
fn bit_depth_for(palette_len: usize) -> png::BitDepth {
    match palette_len {
        0..=2 => png::BitDepth::One,
        3..=4 => png::BitDepth::Two,
        5..=16 => png::BitDepth::Four,
        _ => png::BitDepth::Eight,
    }
}

/// Pack one-byte indices into rows of `depth`-bit samples, MSB first, each
/// row padded to a whole byte.
fn pack_indices(indices: &[u8], width: usize, depth: png::BitDepth) -> Vec<u8> {
    let bits = depth as usize;
    if bits == 8 {
        return indices.to_vec();
    }

    let per_byte = 8 / bits;
    let row_bytes = (width + per_byte - 1) / per_byte;
    let mut out = Vec::with_capacity(row_bytes * (indices.len() / width.max(1)));
    for row in indices.chunks(width.max(1)) {
        for group in row.chunks(per_byte) {
            let mut byte = 0u8;
            for (i, &index) in group.iter().enumerate() {
                byte |= index << (8 - bits * (i + 1));
            }
            out.push(byte);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::{AssetKind, FileManager};
    use image::{GenericImageView, Rgb, RgbImage, Rgba};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn asset_at(root: &Path, rel: &str) -> AssetFile {
        let path = root.join(rel);
        AssetFile {
            extension: FileManager::extension_of(&path),
            path,
            relative_path: PathBuf::from(rel),
            kind: AssetKind::Image,
        }
    }

    fn optimizer() -> ImageOptimizer {
        ImageOptimizer::new(Arc::new(Config::default()))
    }

    fn png_palette_len(path: &Path) -> (png::ColorType, usize) {
        let decoder = png::Decoder::new(File::open(path).unwrap());
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        let palette_len = info.palette.as_ref().map(|p| p.len() / 3).unwrap_or(0);
        (info.color_type, palette_len)
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(ImageOptimizer::target_dimensions(600, 400, 512), Some((512, 341)));
        assert_eq!(ImageOptimizer::target_dimensions(1024, 768, 512), Some((512, 384)));
        assert_eq!(ImageOptimizer::target_dimensions(512, 300, 512), None);
        assert_eq!(ImageOptimizer::target_dimensions(100, 50, 512), None);
        assert_eq!(ImageOptimizer::target_dimensions(10_000, 1, 512), Some((512, 1)));
    }

    #[test]
    fn test_bit_depth_for() {
        assert_eq!(bit_depth_for(2), png::BitDepth::One);
        assert_eq!(bit_depth_for(4), png::BitDepth::Two);
        assert_eq!(bit_depth_for(16), png::BitDepth::Four);
        assert_eq!(bit_depth_for(17), png::BitDepth::Eight);
        assert_eq!(bit_depth_for(256), png::BitDepth::Eight);
    }

    #[test]
    fn test_pack_indices_pads_rows() {
        // 3 pixels per row at 4 bits -> 2 bytes per row
        let packed = pack_indices(&[1, 2, 3, 4, 5, 6], 3, png::BitDepth::Four);
        assert_eq!(packed, vec![0x12, 0x30, 0x45, 0x60]);

        let packed = pack_indices(&[1, 0, 1], 3, png::BitDepth::One);
        assert_eq!(packed, vec![0b1010_0000]);

        let packed = pack_indices(&[7, 200], 2, png::BitDepth::Eight);
        assert_eq!(packed, vec![7, 200]);
    }

    #[tokio::test]
    async fn test_wide_png_is_resized_and_palettized() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::create_dir_all(input.path().join("a")).unwrap();
        gradient(600, 400).save(input.path().join("a/photo.png")).unwrap();

        let size = optimizer()
            .optimize(&asset_at(input.path(), "a/photo.png"), output.path())
            .await
            .unwrap();

        let out = output.path().join("a/photo.png");
        assert_eq!(size, std::fs::metadata(&out).unwrap().len());
        assert_eq!(image::image_dimensions(&out).unwrap(), (512, 341));

        let (color_type, palette_len) = png_palette_len(&out);
        assert_eq!(color_type, png::ColorType::Indexed);
        assert!(palette_len > 0 && palette_len <= 16);
    }

    #[tokio::test]
    async fn test_narrow_jpeg_keeps_size_and_has_no_alpha() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        gradient(300, 200).save(input.path().join("small.jpg")).unwrap();

        optimizer()
            .optimize(&asset_at(input.path(), "small.jpg"), output.path())
            .await
            .unwrap();

        let decoded = image::open(output.path().join("small.jpg")).unwrap();
        assert_eq!(decoded.dimensions(), (300, 200));
        assert!(!decoded.color().has_alpha());
    }

    #[tokio::test]
    async fn test_jpeg_extension_with_alpha_content_is_flattened() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        // PNG bytes with an alpha channel behind a .jpg name
        let rgba = RgbaImage::from_fn(800, 100, |x, _| Rgba([200, 10, 10, (x % 256) as u8]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        rgba.write_to(&mut bytes, image::ImageOutputFormat::Png).unwrap();
        std::fs::write(input.path().join("sprite.jpg"), bytes.into_inner()).unwrap();

        optimizer()
            .optimize(&asset_at(input.path(), "sprite.jpg"), output.path())
            .await
            .unwrap();

        let out = output.path().join("sprite.jpg");
        let written = std::fs::read(&out).unwrap();
        assert_eq!(image::guess_format(&written).unwrap(), image::ImageFormat::Jpeg);
        let decoded = image::open(&out).unwrap();
        assert_eq!(decoded.dimensions(), (512, 64));
        assert!(!decoded.color().has_alpha());
    }

    #[tokio::test]
    async fn test_transparent_png_keeps_transparency() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let rgba = RgbaImage::from_fn(64, 64, |x, _| {
            if x < 32 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([255, 128, 0, 255])
            }
        });
        rgba.save(input.path().join("icon.png")).unwrap();

        optimizer()
            .optimize(&asset_at(input.path(), "icon.png"), output.path())
            .await
            .unwrap();

        let decoded = image::open(output.path().join("icon.png")).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (64, 64));
        assert!(decoded.get_pixel(0, 0)[3] < 128);
        assert!(decoded.get_pixel(63, 0)[3] > 128);
    }

    #[tokio::test]
    async fn test_custom_palette_size_is_respected() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        gradient(100, 100).save(input.path().join("g.png")).unwrap();

        let config = Config { png_colors: 4, ..Default::default() };
        ImageOptimizer::new(Arc::new(config))
            .optimize(&asset_at(input.path(), "g.png"), output.path())
            .await
            .unwrap();

        let (_, palette_len) = png_palette_len(&output.path().join("g.png"));
        assert!(palette_len <= 4);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_decode_error_without_output() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("broken.png"), b"definitely not a png").unwrap();

        let result = optimizer()
            .optimize(&asset_at(input.path(), "broken.png"), output.path())
            .await;

        assert!(matches!(result, Err(OptimizeError::Decode(_))));
        assert!(!output.path().join("broken.png").exists());
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let temp = TempDir::new().unwrap();
        let result = ImageOptimizer::optimize_blocking(
            &temp.path().join("anim.gif"),
            "gif",
            &temp.path().join("out.gif"),
            &Config::default(),
        );
        assert!(matches!(result, Err(OptimizeError::Decode(_))));
    }

    /// Accepts every write and fails on flush, like a full disk behind a buffer
    struct FlushFails(Vec<u8>);

    impl Write for FlushFails {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }
    }

    #[test]
    fn test_png_flush_failure_is_reported() {
        let img = DynamicImage::ImageRgb8(gradient(40, 20));
        let result = ImageOptimizer::encode_png(&img, 16, FlushFails(Vec::new()));
        assert!(result.is_err());

        let mut encoded = Vec::new();
        ImageOptimizer::encode_png(&img, 16, &mut encoded).unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!(decoded.dimensions(), (40, 20));
    }

    #[tokio::test]
    async fn test_keep_alive_is_released_after_the_job() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        gradient(20, 20).save(input.path().join("k.png")).unwrap();

        let keep_alive: KeepAlive = Arc::new(());
        optimizer()
            .with_keep_alive(Some(keep_alive.clone()))
            .optimize(&asset_at(input.path(), "k.png"), output.path())
            .await
            .unwrap();

        assert_eq!(Arc::strong_count(&keep_alive), 1);
    }
}
