use std::path::Path;

use anyhow::{Context, Result};
use assetup_contract::{RawFile, SourceRef};
use assetup_storage::file_size;
use mime::Mime;

/// Best-effort content type from the file extension.
pub fn guess_mime(path: &Path) -> Mime {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "svg" => mime::IMAGE_SVG,
        "txt" | "md" => mime::TEXT_PLAIN,
        "csv" => mime::TEXT_CSV,
        "json" => mime::APPLICATION_JSON,
        "pdf" => mime::APPLICATION_PDF,
        other => parse_extra(other).unwrap_or(mime::APPLICATION_OCTET_STREAM),
    }
}

fn parse_extra(extension: &str) -> Option<Mime> {
    let essence = match extension {
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "zip" => "application/zip",
        _ => return None,
    };
    essence.parse().ok()
}

pub async fn raw_file(path: &Path) -> Result<RawFile> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?
        .to_string();
    let size_bytes = file_size(path).await?;
    Ok(RawFile::new(
        SourceRef::new(path.display().to_string()),
        name,
        size_bytes,
        guess_mime(path).essence_str(),
    ))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::guess_mime;

    #[test]
    fn guesses_from_extension_case_insensitively() {
        assert_eq!(guess_mime(Path::new("a/Hero.PNG")), mime::IMAGE_PNG);
        assert_eq!(guess_mime(Path::new("clip.mov")).essence_str(), "video/quicktime");
        assert_eq!(guess_mime(Path::new("README")), mime::APPLICATION_OCTET_STREAM);
    }
}
