//! Turning attached files and directories into prompt context.
//!
//! Each readable file becomes one fragment:
//!
//! ```text
//!
//! <|file|>[Content from notes/todo.md]:
//! ...file text...<|/file|>
//! ```
//!
//! Fragments are appended to the user's message before it is sent to the
//! deployment. Word documents and PDFs are reduced to plain text; binaries,
//! oversized files and files that are not UTF-8 are skipped with a log line.

use std::fs::{self, File};
use std::io::Read;
use std::panic;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::observability::{ATTACHMENT_BYTES, ATTACHMENTS_READ, ATTACHMENTS_SKIPPED};

/// Directory names never descended into when attaching a directory.
pub const FOLDER_BLACKLIST: &[&str] = &[
    ".git",
    ".github",
    ".svn",
    ".idea",
    ".vscode",
    "__pycache__",
];

/// File suffixes treated as binary and never attached.
pub const BINARY_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".zip", ".tar", ".gz", ".url", ".db", ".sqlite",
    ".exe", ".dll", ".pyd",
];

/// Largest file that will be attached, in bytes.
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Opens an attached file fragment.
pub const FILE_MARKER_START: &str = "<|file|>";

/// Closes an attached file fragment.
pub const FILE_MARKER_END: &str = "<|/file|>";

static DOCX_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*?)?(?:/>|>(.*?)</w:p>)").expect("paragraph pattern is valid")
});

static DOCX_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>").expect("run pattern is valid")
});

/// Reads attachments into prompt fragments.
#[derive(Debug, Clone)]
pub struct AttachmentReader {
    max_file_size: u64,
}

impl Default for AttachmentReader {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentReader {
    /// Creates a reader with the default 5 MiB size limit.
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }

    /// Overrides the per-file size limit.
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// The per-file size limit in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Reads a comma-separated list of files and directories.
    pub fn read_files_content(&self, file_paths: &str) -> String {
        let paths: Vec<PathBuf> = file_paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        self.read_paths(&paths)
    }

    /// Reads every path in order and concatenates the resulting fragments.
    ///
    /// Directories are walked recursively, skipping [`FOLDER_BLACKLIST`].
    pub fn read_paths<P: AsRef<Path>>(&self, paths: &[P]) -> String {
        let mut fragments = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                warn!("File or directory {} does not exist.", path.display());
                ATTACHMENTS_SKIPPED.click();
                continue;
            }
            if path.is_dir() {
                info!("Processing directory: {}", path.display());
                self.read_directory(path, &mut fragments);
            } else {
                let fragment = self.read_single_file(path, None);
                if !fragment.is_empty() {
                    fragments.push(fragment);
                }
            }
        }
        fragments.concat()
    }

    fn read_directory(&self, dir: &Path, fragments: &mut Vec<String>) {
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !is_blacklisted_dir(entry.file_name().to_string_lossy().as_ref())
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to walk {}: {}", dir.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let fragment = self.read_single_file(entry.path(), Some(dir));
            if !fragment.is_empty() {
                fragments.push(fragment);
            }
        }
    }

    /// Reads one file into a fragment, or returns an empty string if the file
    /// is skipped.
    ///
    /// With `base_dir` the header names the file relative to that directory.
    pub fn read_single_file(&self, path: &Path, base_dir: Option<&Path>) -> String {
        match self.try_read_single_file(path, base_dir) {
            Ok(Some(fragment)) => {
                ATTACHMENTS_READ.click();
                ATTACHMENT_BYTES.count(fragment.len() as u64);
                info!("Successfully read file: {}", path.display());
                fragment
            }
            Ok(None) => {
                ATTACHMENTS_SKIPPED.click();
                String::new()
            }
            Err(err) => {
                ATTACHMENTS_SKIPPED.click();
                error!("Error reading file {}: {}", path.display(), err);
                String::new()
            }
        }
    }

    fn try_read_single_file(&self, path: &Path, base_dir: Option<&Path>) -> Result<Option<String>> {
        let size = fs::metadata(path)
            .map_err(|err| Error::io(format!("cannot stat {}", path.display()), err))?
            .len();
        if size > self.max_file_size {
            warn!(
                "File {} is too large ({} bytes) and will be skipped.",
                path.display(),
                size
            );
            return Ok(None);
        }

        let lower = path.to_string_lossy().to_lowercase();
        let content = if is_binary_file(path) {
            info!("Skipping binary file: {}", path.display());
            return Ok(None);
        } else if lower.ends_with(".docx") {
            info!("Processing DOCX file: {}", path.display());
            extract_text_from_docx(path).unwrap_or_else(|err| {
                error!("Error extracting text from DOCX: {}", err);
                String::new()
            })
        } else if lower.ends_with(".pdf") {
            info!("Processing PDF file: {}", path.display());
            extract_text_from_pdf(path).unwrap_or_else(|err| {
                error!("Error extracting text from PDF: {}", err);
                String::new()
            })
        } else {
            let bytes = fs::read(path)
                .map_err(|err| Error::io(format!("cannot read {}", path.display()), err))?;
            match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    warn!("Unicode decode error for file {}: {}", path.display(), err);
                    return Ok(None);
                }
            }
        };

        let label = match base_dir {
            Some(base) => format!(
                "{}/{}",
                base.display(),
                relative_path(path, base).display()
            ),
            None => path.display().to_string(),
        };
        Ok(Some(format!(
            "\n{FILE_MARKER_START}[Content from {label}]:\n{content}{FILE_MARKER_END}\n"
        )))
    }
}

fn is_blacklisted_dir(name: &str) -> bool {
    FOLDER_BLACKLIST.contains(&name)
}

/// Extracts the paragraph text of a Word document, one paragraph per line.
pub fn extract_text_from_docx(path: &Path) -> Result<String> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|err| Error::io(format!("cannot open {display}"), err))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| Error::attachment(format!("not a docx archive: {err}"), &display))?;
    let mut document = archive
        .by_name("word/document.xml")
        .map_err(|err| Error::attachment(format!("missing word/document.xml: {err}"), &display))?;
    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .map_err(|err| Error::io(format!("cannot read document body of {display}"), err))?;
    Ok(docx_xml_to_text(&xml))
}

fn docx_xml_to_text(xml: &str) -> String {
    DOCX_PARAGRAPH
        .captures_iter(xml)
        .map(|paragraph| {
            let body = paragraph.get(1).map(|m| m.as_str()).unwrap_or("");
            DOCX_RUN
                .captures_iter(body)
                .map(|run| match run.get(1) {
                    Some(text) => unescape_xml(text.as_str()),
                    None => "\t".to_string(),
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extracts the text layer of a PDF.
pub fn extract_text_from_pdf(path: &Path) -> Result<String> {
    let display = path.display().to_string();
    // pdf-extract panics on some malformed documents.
    match panic::catch_unwind(|| pdf_extract::extract_text(path)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(err)) => Err(Error::attachment(format!("cannot extract text: {err}"), display)),
        Err(_) => Err(Error::attachment("PDF parser panicked", display)),
    }
}

/// Normalizes a path lexically: `.` components are dropped and `..` folds the
/// preceding component.
pub fn normalize_file_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

/// Returns true if the path ends in one of [`BINARY_EXTENSIONS`] (case-insensitive).
pub fn is_binary_file<P: AsRef<Path>>(path: P) -> bool {
    let lower = path.as_ref().to_string_lossy().to_lowercase();
    BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// The path of `path` relative to `base`, or `path` itself when it is not
/// under `base`.
pub fn relative_path<'a>(path: &'a Path, base: &Path) -> &'a Path {
    path.strip_prefix(base).unwrap_or(path)
}
