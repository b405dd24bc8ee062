//! PDF extraction
//!
//! Produces per-page text and the images embedded in each page. Images are written
//! to `{image_root}/{document_key}/image_{page}_{seq}.{ext}`, where the key is derived
//! from the PDF bytes, so later stages (captioning, source image attachment, display)
//! can reload them without reparsing the PDF and documents never overwrite each other.

use crate::error::{MedragError, Result};
use crate::ml::text::TextProcessor;
use crate::utils::sha256_hex;
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// One page of extracted text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number
    pub index: u32,
    pub text: String,
}

/// Container format of an extracted image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Jpeg2000,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Jpeg2000 => "jp2",
        }
    }

    /// Vision providers accept JPEG and PNG only
    pub fn is_captionable(&self) -> bool {
        matches!(self, ImageFormat::Jpeg | ImageFormat::Png)
    }
}

/// An image pulled out of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub page_index: u32,
    /// 1-based position among the page's images
    pub sequence_in_page: u32,
    pub raw_bytes: Vec<u8>,
    pub format: ImageFormat,
    /// Where the image was written
    pub path: PathBuf,
    /// `{document_key}/{file_name}`, relative to the image root
    pub image_ref: String,
}

impl EmbeddedImage {
    /// `image_{page}_{seq}.{ext}`
    pub fn file_name(&self) -> String {
        image_file_name(self.page_index, self.sequence_in_page, self.format)
    }
}

/// Deterministic on-disk name of an extracted image
pub fn image_file_name(page_index: u32, sequence_in_page: u32, format: ImageFormat) -> String {
    format!(
        "image_{}_{}.{}",
        page_index,
        sequence_in_page,
        format.extension()
    )
}

/// Directory name for a document's images: the first 16 hex digits of its SHA-256
pub fn document_key(pdf_bytes: &[u8]) -> String {
    sha256_hex(pdf_bytes)[..16].to_string()
}

/// Result of extracting one source document
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub source: PathBuf,
    /// See [`document_key`]
    pub key: String,
    /// Where this document's images were written
    pub image_dir: PathBuf,
    pub pages: Vec<Page>,
    pub images: Vec<EmbeddedImage>,
}

/// PDF text and image extractor
pub struct PdfProcessor {
    processor: TextProcessor,
}

impl PdfProcessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            processor: TextProcessor::new()?,
        })
    }

    /// Extract pages and images from `pdf_path`, writing images under `image_root`
    pub fn extract<P: AsRef<Path>, D: AsRef<Path>>(
        &self,
        pdf_path: P,
        image_root: D,
    ) -> Result<ExtractedDocument> {
        let pdf_path = pdf_path.as_ref();

        if !pdf_path.exists() {
            return Err(MedragError::Extraction(format!(
                "PDF file not found: {}",
                pdf_path.display()
            )));
        }

        let bytes = std::fs::read(pdf_path)?;
        let document = Document::load_mem(&bytes).map_err(|e| {
            MedragError::Extraction(format!("Failed to parse {}: {}", pdf_path.display(), e))
        })?;
        let key = document_key(&bytes);

        let pages = self.extract_pages(&document)?;

        let image_dir = image_root.as_ref().join(&key);
        std::fs::create_dir_all(&image_dir)?;
        clear_extracted_images(&image_dir)?;
        let images = self.extract_images(&document, &image_dir, &key)?;

        log::info!(
            "Extracted {} pages and {} images from {}",
            pages.len(),
            images.len(),
            pdf_path.display()
        );

        Ok(ExtractedDocument {
            source: pdf_path.to_path_buf(),
            key,
            image_dir,
            pages,
            images,
        })
    }

    /// Page texts in page order
    pub fn extract_pages(&self, document: &Document) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        // BTreeMap keys are 1-based page numbers in ascending order
        for page_number in document.get_pages().keys() {
            let raw = document.extract_text(&[*page_number]).unwrap_or_else(|e| {
                log::warn!("No text extracted from page {}: {}", page_number, e);
                String::new()
            });
            pages.push(Page {
                index: *page_number,
                text: self.processor.normalize_page_text(&raw),
            });
        }
        Ok(pages)
    }

    /// Images in page order, then resource order within a page.
    ///
    /// Sequence numbers count every image XObject on the page, so an image that
    /// cannot be decoded leaves a gap instead of renumbering the ones after it.
    pub fn extract_images(
        &self,
        document: &Document,
        image_dir: &Path,
        key: &str,
    ) -> Result<Vec<EmbeddedImage>> {
        let mut images = Vec::new();

        for (page_number, page_id) in document.get_pages() {
            let Some(xobjects) = page_xobjects(document, page_id) else {
                continue;
            };

            let mut sequence = 0u32;
            for (name, object) in xobjects.iter() {
                let Ok((_, resolved)) = document.dereference(object) else {
                    continue;
                };
                let Ok(stream) = resolved.as_stream() else {
                    continue;
                };
                if !matches!(stream.dict.get(b"Subtype").and_then(Object::as_name), Ok(b"Image")) {
                    continue;
                }
                sequence += 1;

                let Some((format, bytes)) = decode_image_stream(document, stream) else {
                    log::debug!(
                        "Skipping image {} on page {}: unsupported encoding",
                        String::from_utf8_lossy(name),
                        page_number
                    );
                    continue;
                };

                let file_name = image_file_name(page_number, sequence, format);
                let path = image_dir.join(&file_name);
                std::fs::write(&path, &bytes)?;
                log::info!("Saved image: {}", path.display());

                images.push(EmbeddedImage {
                    page_index: page_number,
                    sequence_in_page: sequence,
                    raw_bytes: bytes,
                    format,
                    path,
                    image_ref: format!("{}/{}", key, file_name),
                });
            }
        }

        Ok(images)
    }
}

/// `/Resources /XObject` of a page, following `/Parent` for inherited resources
fn page_xobjects(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = document.get_dictionary(page_id).ok()?;
    loop {
        if let Ok(resources) = node.get(b"Resources") {
            let resources = document.dereference(resources).ok()?.1.as_dict().ok()?;
            let xobjects = resources.get(b"XObject").ok()?;
            return document.dereference(xobjects).ok()?.1.as_dict().ok();
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = document.get_dictionary(parent).ok()?;
    }
}

/// Pick a container for the stream's samples
fn decode_image_stream(document: &Document, stream: &lopdf::Stream) -> Option<(ImageFormat, Vec<u8>)> {
    let filters = stream_filters(&stream.dict);
    match filters.last().map(Vec::as_slice) {
        Some(b"DCTDecode") => Some((ImageFormat::Jpeg, stream.content.clone())),
        Some(b"JPXDecode") => Some((ImageFormat::Jpeg2000, stream.content.clone())),
        None | Some(b"FlateDecode") => {
            let samples = if filters.is_empty() {
                stream.content.clone()
            } else {
                stream.decompressed_content().ok()?
            };
            encode_raw_samples(document, &stream.dict, samples).map(|png| (ImageFormat::Png, png))
        }
        Some(_) => None,
    }
}

fn stream_filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// How raw samples map to pixels
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColorModel {
    Gray,
    Rgb,
    /// One sample per pixel, looked up in a gray (1) or RGB (3) palette
    Indexed { components: usize, palette: Vec<u8> },
}

impl ColorModel {
    /// Resolve a `/ColorSpace` value, following indirect references
    fn resolve(document: &Document, object: &Object) -> Option<Self> {
        let (_, object) = document.dereference(object).ok()?;
        match object {
            Object::Name(name) => Self::from_family(name),
            Object::Array(items) => {
                let family = items.first()?.as_name().ok()?;
                match family {
                    b"ICCBased" => {
                        let (_, profile) = document.dereference(items.get(1)?).ok()?;
                        let profile = match profile {
                            Object::Stream(stream) => &stream.dict,
                            Object::Dictionary(dict) => dict,
                            _ => return None,
                        };
                        match profile.get(b"N").and_then(Object::as_i64).ok()? {
                            1 => Some(ColorModel::Gray),
                            3 => Some(ColorModel::Rgb),
                            _ => None,
                        }
                    }
                    b"Indexed" | b"I" => {
                        let components = match Self::resolve(document, items.get(1)?)? {
                            ColorModel::Gray => 1,
                            ColorModel::Rgb => 3,
                            ColorModel::Indexed { .. } => return None,
                        };
                        let (_, lookup) = document.dereference(items.get(3)?).ok()?;
                        let palette = match lookup {
                            Object::String(bytes, _) => bytes.clone(),
                            Object::Stream(stream) => stream
                                .decompressed_content()
                                .unwrap_or_else(|_| stream.content.clone()),
                            _ => return None,
                        };
                        Some(ColorModel::Indexed {
                            components,
                            palette,
                        })
                    }
                    other => Self::from_family(other),
                }
            }
            _ => None,
        }
    }

    fn from_family(name: &[u8]) -> Option<Self> {
        match name {
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(ColorModel::Rgb),
            b"DeviceGray" | b"CalGray" | b"G" => Some(ColorModel::Gray),
            _ => None,
        }
    }
}

/// Re-encode 8-bit gray, RGB or palette samples as PNG
fn encode_raw_samples(document: &Document, dict: &Dictionary, samples: Vec<u8>) -> Option<Vec<u8>> {
    let width = dict.get(b"Width").and_then(Object::as_i64).ok()? as u32;
    let height = dict.get(b"Height").and_then(Object::as_i64).ok()? as u32;
    let bits = dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    let color_model = ColorModel::resolve(document, dict.get(b"ColorSpace").ok()?)?;
    let image = match color_model {
        ColorModel::Rgb => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, samples)?),
        ColorModel::Gray => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, samples)?),
        ColorModel::Indexed {
            components,
            palette,
        } => {
            let mut expanded = Vec::with_capacity(samples.len() * components);
            for index in samples {
                let start = index as usize * components;
                expanded.extend_from_slice(palette.get(start..start + components)?);
            }
            if components == 3 {
                DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, expanded)?)
            } else {
                DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, expanded)?)
            }
        }
    };

    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, image::ImageFormat::Png).ok()?;
    Some(png.into_inner())
}

/// Remove `image_*` files left by a previous extraction
fn clear_extracted_images(image_dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(image_dir)? {
        let path = entry?.path();
        let is_stale = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("image_"));
        if is_stale && path.is_file() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Delete every document image directory under `image_root` except `keep`
pub fn retain_document_images(image_root: &Path, keep: &str) -> Result<()> {
    if !image_root.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(image_root)? {
        let path = entry?.path();
        let is_other_document = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name != keep && is_document_key(name));
        if is_other_document && path.is_dir() {
            log::debug!("Removing images of previous document: {}", path.display());
            std::fs::remove_dir_all(&path)?;
        }
    }
    Ok(())
}

fn is_document_key(name: &str) -> bool {
    name.len() == 16 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Stream, dictionary};

    #[test]
    fn test_image_file_name() {
        assert_eq!(image_file_name(2, 1, ImageFormat::Jpeg), "image_2_1.jpg");
        assert_eq!(image_file_name(10, 3, ImageFormat::Png), "image_10_3.png");
    }

    #[test]
    fn test_captionable_formats() {
        assert!(ImageFormat::Jpeg.is_captionable());
        assert!(ImageFormat::Png.is_captionable());
        assert!(!ImageFormat::Jpeg2000.is_captionable());
    }

    #[test]
    fn test_missing_file_is_extraction_error() {
        let processor = PdfProcessor::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = processor.extract(dir.path().join("missing.pdf"), dir.path());
        assert!(matches!(result, Err(MedragError::Extraction(_))));
    }

    #[test]
    fn test_garbage_file_is_extraction_error() {
        let processor = PdfProcessor::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();

        let result = processor.extract(&path, dir.path().join("images"));
        assert!(matches!(result, Err(MedragError::Extraction(_))));
    }

    fn raw_image(width: i64, color_space: Object) -> Dictionary {
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => 1,
            "BitsPerComponent" => 8,
            "ColorSpace" => color_space,
        }
    }

    fn icc_profile(document: &mut Document, components: i64) -> Object {
        let profile = document.add_object(Stream::new(dictionary! { "N" => components }, vec![]));
        Object::Array(vec!["ICCBased".into(), profile.into()])
    }

    /// One page whose XObjects are `images`, in order
    fn write_single_page(path: &Path, mut document: Document, images: Vec<Stream>) {
        let pages_id = document.new_object_id();
        let mut xobjects = Dictionary::new();
        for (i, image) in images.into_iter().enumerate() {
            xobjects.set(format!("Im{}", i + 1).into_bytes(), document.add_object(image));
        }
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        });
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);
        document.save(path).unwrap();
    }

    fn decoded_pixels(png: &[u8]) -> Vec<u8> {
        image::load_from_memory(png).unwrap().to_rgb8().into_raw()
    }

    #[test]
    fn test_raw_rgb_samples_become_png() {
        let document = Document::with_version("1.5");
        let dict = raw_image(2, "DeviceRGB".into());
        let png = encode_raw_samples(&document, &dict, vec![255, 0, 0, 0, 0, 255]).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
    }

    #[test]
    fn test_unsupported_color_space_skipped() {
        let document = Document::with_version("1.5");
        let dict = raw_image(1, "DeviceCMYK".into());
        assert!(encode_raw_samples(&document, &dict, vec![0, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_icc_based_color_spaces_follow_component_count() {
        let mut document = Document::with_version("1.5");
        let rgb = icc_profile(&mut document, 3);
        let gray = icc_profile(&mut document, 1);
        let cmyk = icc_profile(&mut document, 4);

        let png = encode_raw_samples(&document, &raw_image(1, rgb), vec![10, 20, 30]).unwrap();
        assert_eq!(decoded_pixels(&png), vec![10, 20, 30]);
        let png = encode_raw_samples(&document, &raw_image(2, gray), vec![0, 200]).unwrap();
        assert_eq!(decoded_pixels(&png), vec![0, 0, 0, 200, 200, 200]);
        assert!(encode_raw_samples(&document, &raw_image(1, cmyk), vec![0; 4]).is_none());
    }

    #[test]
    fn test_indirect_color_space_is_resolved() {
        let mut document = Document::with_version("1.5");
        let color_space = document.add_object(Object::Name(b"DeviceGray".to_vec()));
        let dict = raw_image(1, color_space.into());
        assert!(encode_raw_samples(&document, &dict, vec![128]).is_some());
    }

    #[test]
    fn test_indexed_samples_expand_through_palette() {
        let mut document = Document::with_version("1.5");
        let palette = Object::String(vec![255, 0, 0, 0, 0, 255], lopdf::StringFormat::Hexadecimal);
        let lookup = document.add_object(palette);
        let color_space = Object::Array(vec![
            "Indexed".into(),
            "DeviceRGB".into(),
            1.into(),
            lookup.into(),
        ]);

        let png = encode_raw_samples(&document, &raw_image(2, color_space.clone()), vec![1, 0]).unwrap();
        assert_eq!(decoded_pixels(&png), vec![0, 0, 255, 255, 0, 0]);
        // Index past the palette
        assert!(encode_raw_samples(&document, &raw_image(1, color_space), vec![2]).is_none());
    }

    #[test]
    fn test_icc_based_image_is_extracted_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("scan.pdf");
        let mut document = Document::with_version("1.5");
        let rgb = icc_profile(&mut document, 3);
        write_single_page(&pdf, document, vec![Stream::new(raw_image(1, rgb), vec![1, 2, 3])]);

        let extracted = PdfProcessor::new()
            .unwrap()
            .extract(&pdf, dir.path().join("images"))
            .unwrap();

        assert_eq!(extracted.images.len(), 1);
        assert_eq!(extracted.images[0].format, ImageFormat::Png);
        assert_eq!(extracted.images[0].file_name(), "image_1_1.png");
    }

    #[test]
    fn test_skipped_image_keeps_its_sequence_number() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("mixed.pdf");
        let cmyk = Stream::new(raw_image(1, "DeviceCMYK".into()), vec![0, 0, 0, 0]);
        let mut jpeg = raw_image(1, "DeviceRGB".into());
        jpeg.set("Filter", "DCTDecode");
        let jpeg = Stream::new(jpeg, vec![0xFF, 0xD8, 0xFF, 0xE0]);
        write_single_page(&pdf, Document::with_version("1.5"), vec![cmyk, jpeg]);

        let extracted = PdfProcessor::new()
            .unwrap()
            .extract(&pdf, dir.path().join("images"))
            .unwrap();

        assert_eq!(extracted.images.len(), 1);
        assert_eq!(extracted.images[0].sequence_in_page, 2);
        assert_eq!(extracted.images[0].file_name(), "image_1_2.jpg");
        assert_eq!(
            extracted.images[0].image_ref,
            format!("{}/image_1_2.jpg", extracted.key)
        );
        assert!(extracted.image_dir.join("image_1_2.jpg").is_file());
    }

    #[test]
    fn test_document_key_depends_on_content() {
        let key = document_key(b"%PDF-1.5 one");
        assert_eq!(key.len(), 16);
        assert_eq!(key, document_key(b"%PDF-1.5 one"));
        assert_ne!(key, document_key(b"%PDF-1.5 two"));
    }

    #[test]
    fn test_only_kept_document_images_survive() {
        let root = tempfile::tempdir().unwrap();
        let keep = document_key(b"current");
        let stale = document_key(b"previous");
        for key in [&keep, &stale] {
            std::fs::create_dir_all(root.path().join(key)).unwrap();
            std::fs::write(root.path().join(key).join("image_1_1.png"), b"png").unwrap();
        }
        std::fs::create_dir_all(root.path().join("notes")).unwrap();

        retain_document_images(root.path(), &keep).unwrap();

        assert!(root.path().join(&keep).join("image_1_1.png").exists());
        assert!(!root.path().join(&stale).exists());
        assert!(root.path().join("notes").exists());
    }

    #[test]
    fn test_stale_images_are_cleared() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("image_1_1.png"), b"old").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"keep").unwrap();

        clear_extracted_images(dir.path()).unwrap();

        assert!(!dir.path().join("image_1_1.png").exists());
        assert!(dir.path().join("keep.txt").exists());
    }
}
