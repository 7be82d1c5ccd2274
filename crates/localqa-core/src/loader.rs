//! Reads PDF, plain-text and Markdown files into [`SourceDocument`]s.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{document_id, DocumentFormat, SourceDocument};

/// One text extractor per supported format.
pub trait FormatReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<String>;
}

pub struct PlainTextReader;

impl FormatReader for PlainTextReader {
    fn read(&self, path: &Path) -> Result<String> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                let bytes = fs::read(path).map_err(|e| Error::load(path, e))?;
                Ok(String::from_utf8_lossy(&bytes).to_string())
            }
            Err(e) => Err(Error::load(path, e)),
        }
    }
}

pub struct PdfReader;

impl FormatReader for PdfReader {
    fn read(&self, path: &Path) -> Result<String> {
        // pdf-extract panics on some malformed files instead of returning an error.
        let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text(path))
            .map_err(|payload| Error::load(path, format!("PDF parser panicked: {}", panic_message(&*payload))))?;
        let text = extracted.map_err(|e| Error::load(path, format!("{e}")))?;
        Ok(text.replace('\x0c', "\n\n"))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl DocumentFormat {
    pub fn reader(self) -> &'static dyn FormatReader {
        match self {
            Self::Pdf => &PdfReader,
            Self::Text | Self::Markdown => &PlainTextReader,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        Self
    }

    /// Loads a single file; its origin is the path as given.
    pub fn load(&self, path: &Path) -> Result<SourceDocument> {
        self.load_with_origin(path, origin_label(path))
    }

    /// Loads a file found under `root`; its origin is the path relative to `root`.
    pub fn load_relative(&self, root: &Path, path: &Path) -> Result<SourceDocument> {
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.load_with_origin(path, origin_label(relative))
    }

    fn load_with_origin(&self, path: &Path, origin: String) -> Result<SourceDocument> {
        let format = DocumentFormat::from_path(path)?;
        let text = format.reader().read(path)?;
        tracing::debug!(path = %path.display(), %format, chars = text.chars().count(), "loaded document");
        Ok(SourceDocument {
            id: document_id(&origin),
            origin,
            path: path.to_path_buf(),
            format,
            text,
            loaded_at: Utc::now(),
        })
    }

    /// Lists loadable files under `root`, recursively and in sorted order.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(Error::load(
                root,
                io::Error::new(io::ErrorKind::NotFound, "directory does not exist"),
            ));
        }
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if DocumentFormat::from_path(path).is_ok() {
                files.push(path.to_path_buf());
            } else {
                tracing::debug!(path = %path.display(), "skipping unsupported file");
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Forward-slash label for a path, independent of the host separator.
fn origin_label(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            Component::RootDir => Some(String::new()),
            _ => None,
        })
        .collect();
    parts.join("/")
}
