//! Decoding, saving and linking of images returned alongside OCR markdown.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::error::{MistralOcrError, Result};
use crate::ocr::ExtractedImage;

/// Markdown image link, `![alt](target)`.
pub static IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[(?P<alt>[^\]]*)\]\((?P<target>[^)\s]+)\)").expect("image link pattern")
});

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// An image that was written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedImage {
    pub id: String,
    pub path: PathBuf,
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and payload.
pub fn parse_data_uri(data_uri: &str) -> Result<(&str, &str)> {
    if data_uri.is_empty() {
        return Err(MistralOcrError::Image("Data URI cannot be empty".to_string()));
    }

    let (header, payload) = data_uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .ok_or_else(|| {
            MistralOcrError::Image(
                "Invalid data URI format, expected data:<mime>;base64,<data>".to_string(),
            )
        })?;

    if header.is_empty() {
        return Err(MistralOcrError::Image(
            "Missing MIME type in data URI".to_string(),
        ));
    }

    if payload.is_empty() {
        return Err(MistralOcrError::Image(
            "Missing base64 data in data URI".to_string(),
        ));
    }

    Ok((header, payload))
}

/// Maps an image MIME type to a file extension, defaulting to `png`.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.to_ascii_lowercase().as_str() {
        "image/jpeg" => "jpeg",
        "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Decodes one image payload from the OCR service.
///
/// Payloads are normally data URIs; bare base64 is accepted too, with the MIME
/// type guessed from the image id.
pub fn decode_image(id: &str, page: u32, payload: &str) -> Result<ExtractedImage> {
    let (mime_type, encoded) = if payload.starts_with("data:") {
        let (mime, data) = parse_data_uri(payload)
            .map_err(|e| MistralOcrError::Image(format!("Image '{id}': {e}")))?;
        (mime.to_string(), data)
    } else {
        let guessed = mime_guess::from_path(id)
            .first()
            .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| "image/png".to_string());
        (guessed, payload)
    };

    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
        MistralOcrError::Image(format!("Failed to decode base64 image data for '{id}': {e}"))
    })?;

    Ok(ExtractedImage {
        id: id.to_string(),
        page,
        extension: extension_for_mime(&mime_type),
        mime_type,
        bytes,
    })
}

/// Reduces a name to `[A-Za-z0-9._-]` with no leading dots.
fn sanitize_component(raw: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

fn id_stem(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) =>
        {
            stem
        }
        _ => id,
    }
}

/// Preferred file names, `{document}_{image}.{ext}`, unique within one result.
pub fn assign_file_names(document_stem: &str, images: &[ExtractedImage]) -> Vec<String> {
    let prefix = sanitize_component(document_stem, "document");
    let mut taken = HashSet::new();

    images
        .iter()
        .map(|image| {
            let stem = format!("{prefix}_{}", sanitize_component(id_stem(&image.id), "image"));
            let mut name = format!("{stem}.{}", image.extension);
            let mut counter = 1;
            while !taken.insert(name.to_lowercase()) {
                name = format!("{stem}-{counter}.{}", image.extension);
                counter += 1;
            }
            name
        })
        .collect()
}

/// Most suffixes tried for a name already taken in the output directory.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Writes all images into `dir`, or none of them.
///
/// Files are staged in a temporary directory inside `dir` and linked into
/// place once every write succeeded. Existing files are never replaced: a
/// taken name gets a `-N` suffix. If promotion fails, the files already
/// promoted are removed again. The staging directory never outlives the call.
pub fn save_images(
    dir: &Path,
    document_stem: &str,
    images: &[ExtractedImage],
) -> Result<Vec<SavedImage>> {
    if images.is_empty() {
        return Ok(Vec::new());
    }

    let staging = tempfile::Builder::new()
        .prefix(".ocr-staging-")
        .tempdir_in(dir)?;
    let names = assign_file_names(document_stem, images);

    for (image, name) in images.iter().zip(&names) {
        let staged = staging.path().join(name);
        let mut file = File::create_new(&staged)?;
        file.write_all(&image.bytes).map_err(|e| {
            MistralOcrError::Image(format!("Failed to write image '{}': {e}", image.id))
        })?;
        file.sync_all()?;
    }

    let mut saved: Vec<SavedImage> = Vec::with_capacity(images.len());
    for (image, name) in images.iter().zip(&names) {
        let promoted = promote(&staging.path().join(name), dir, name);
        let target = match promoted {
            Ok(target) => target,
            Err(e) => {
                for done in &saved {
                    if let Err(cleanup) = fs::remove_file(&done.path) {
                        warn!(path = %done.path.display(), error = %cleanup, "Failed to roll back image");
                    }
                }
                return Err(MistralOcrError::Image(format!(
                    "Failed to move image '{}' into {}: {e}",
                    image.id,
                    dir.display()
                )));
            }
        };
        debug!(id = %image.id, path = %target.display(), "Saved image");
        saved.push(SavedImage {
            id: image.id.clone(),
            path: target,
        });
    }

    staging.close()?;
    Ok(saved)
}

/// Links `staged` into `dir` under `name`, or under `{stem}-N.{ext}` when
/// that name is taken. Never replaces an existing file.
fn promote(staged: &Path, dir: &Path, name: &str) -> io::Result<PathBuf> {
    let (stem, extension) = name.rsplit_once('.').unwrap_or((name, ""));

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = match (attempt, extension) {
            (0, _) => name.to_string(),
            (n, "") => format!("{stem}-{n}"),
            (n, ext) => format!("{stem}-{n}.{ext}"),
        };
        let target = dir.join(candidate);

        match fs::hard_link(staged, &target) {
            Ok(()) => return Ok(target),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {name}"),
    ))
}

/// Points every markdown image link whose target is a saved image id at the
/// file on disk. Other links are left untouched.
pub fn rewrite_image_references(markdown: &str, saved: &[SavedImage]) -> String {
    if saved.is_empty() {
        return markdown.to_string();
    }

    let by_id: HashMap<&str, &Path> = saved
        .iter()
        .map(|image| (image.id.as_str(), image.path.as_path()))
        .collect();

    IMAGE_LINK
        .replace_all(markdown, |caps: &Captures| {
            let target = &caps["target"];
            match by_id.get(target) {
                Some(path) => {
                    let path = path.display().to_string();
                    if path.contains(char::is_whitespace) {
                        format!("![{}](<{path}>)", &caps["alt"])
                    } else {
                        format!("![{}]({path})", &caps["alt"])
                    }
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
