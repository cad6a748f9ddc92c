//! Attachment images: where they live and how they end up in a document.

use crate::error::PrintError;
use base64::Engine;
use image::GenericImageView;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Path(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
    Unresolved,
}

impl ImageRef {
    /// Classifies a location string as handed over by the backend.
    pub fn from_location(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return ImageRef::Unresolved;
        };
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("data:")
            || lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("blob:")
        {
            return ImageRef::Url(raw.to_string());
        }
        match lower.strip_prefix("file://") {
            Some(_) => ImageRef::Path(PathBuf::from(&raw["file://".len()..])),
            None => ImageRef::Path(PathBuf::from(raw)),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, ImageRef::Unresolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedImage {
    /// Inlined as a `data:` URI, decoded at least once.
    Embedded {
        src: String,
        width: u32,
        height: u32,
    },
    /// Remote reference left for the document to fetch.
    Linked { src: String },
    Missing { reason: String },
}

impl ResolvedImage {
    pub fn src(&self) -> Option<&str> {
        match self {
            ResolvedImage::Embedded { src, .. } | ResolvedImage::Linked { src } => Some(src),
            ResolvedImage::Missing { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    base_dir: Option<PathBuf>,
}

impl AssetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative paths are read from `dir` instead of the working directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Never fails; anything unreadable becomes [`ResolvedImage::Missing`].
    pub fn resolve(&self, image: &ImageRef) -> ResolvedImage {
        match self.try_resolve(image) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(error = %err, "attachment image unavailable");
                ResolvedImage::Missing {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn try_resolve(&self, image: &ImageRef) -> Result<ResolvedImage, PrintError> {
        match image {
            ImageRef::Unresolved => Err(PrintError::Asset("no image location".to_string())),
            ImageRef::Bytes(bytes) => embed_bytes(bytes),
            ImageRef::Path(path) => {
                let path = self.full_path(path);
                let bytes = std::fs::read(&path).map_err(|err| {
                    PrintError::Asset(format!("cannot read {}: {err}", path.display()))
                })?;
                embed_bytes(&bytes)
            }
            ImageRef::Url(url) if url.to_ascii_lowercase().starts_with("data:") => {
                let bytes = data_uri_bytes(url)
                    .ok_or_else(|| PrintError::Asset("malformed data URI".to_string()))?;
                let (width, height) = decoded_dimensions(&bytes)?;
                Ok(ResolvedImage::Embedded {
                    src: url.clone(),
                    width,
                    height,
                })
            }
            ImageRef::Url(url) => Ok(ResolvedImage::Linked { src: url.clone() }),
        }
    }

    /// Resolves every image in parallel; the result keeps input order.
    pub fn resolve_all(&self, images: &[ImageRef]) -> Vec<ResolvedImage> {
        images.par_iter().map(|image| self.resolve(image)).collect()
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Decodes `bytes` to confirm they are an image and inlines them.
pub fn embed_bytes(bytes: &[u8]) -> Result<ResolvedImage, PrintError> {
    let format = image::guess_format(bytes)
        .map_err(|err| PrintError::Asset(format!("unrecognised image data: {err}")))?;
    let (width, height) = decoded_dimensions(bytes)?;
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(ResolvedImage::Embedded {
        src: format!("data:{};base64,{payload}", format.to_mime_type()),
        width,
        height,
    })
}

fn decoded_dimensions(bytes: &[u8]) -> Result<(u32, u32), PrintError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| PrintError::Asset(format!("undecodable image: {err}")))?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(PrintError::Asset("image has no pixels".to_string()));
    }
    Ok((width, height))
}

fn data_uri_bytes(uri: &str) -> Option<Vec<u8>> {
    let (header, payload) = uri.split_once(',')?;
    if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim().as_bytes())
            .ok()
    } else {
        Some(payload.as_bytes().to_vec())
    }
}
