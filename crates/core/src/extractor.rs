//! Per-file probes used by the handlers: content-type sniffing, image dimensions,
//! EXIF fields and the capped content hash. Codec work is delegated to `image`,
//! `infer` and `kamadak-exif`.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Content hashes cover at most this many leading bytes.
pub const HASH_CAP_BYTES: u64 = 256 * 1024 * 1024;

/// Sniffs the magic bytes first and falls back to the extension table when the
/// content is inconclusive (plain text never has magic bytes).
pub fn sniff_mime(path: &Path, ext: &str) -> Option<String> {
    let sniffed = match infer::get_from_path(path) {
        Ok(kind) => kind.map(|k| k.mime_type().to_string()),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "content sniff failed");
            None
        }
    };
    sniffed.or_else(|| mime_from_extension(ext).map(str::to_string))
}

pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "wmv" => "video/x-ms-wmv",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime)
}

pub fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// Width and height from the image header, `None` when the format is unknown or broken.
pub fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    let reader = image::io::Reader::open(path).ok()?.with_guessed_format().ok()?;
    match reader.into_dimensions() {
        Ok(dims) => Some(dims),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "image decode failed");
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifFields {
    pub taken_unix: Option<i64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

#[cfg(feature = "exif")]
pub fn read_exif(path: &Path) -> ExifFields {
    use exif::{In, Tag, Value};

    fn ascii(exif: &exif::Exif, tag: Tag) -> Option<String> {
        let field = exif.get_field(tag, In::PRIMARY)?;
        match &field.value {
            Value::Ascii(parts) => parts
                .first()
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return ExifFields::default(),
    };
    let mut reader = io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(_) => return ExifFields::default(),
    };
    ExifFields {
        taken_unix: ascii(&exif, Tag::DateTimeOriginal).and_then(|s| parse_exif_datetime(&s)),
        camera_make: ascii(&exif, Tag::Make),
        camera_model: ascii(&exif, Tag::Model),
    }
}

#[cfg(not(feature = "exif"))]
pub fn read_exif(_path: &Path) -> ExifFields {
    ExifFields::default()
}

/// EXIF stores local time as `YYYY:MM:DD HH:MM:SS` without a zone; it is taken as UTC.
pub fn parse_exif_datetime(raw: &str) -> Option<i64> {
    chrono::NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// blake3 over at most `max_bytes` leading bytes. For larger files the digest
/// identifies the prefix only.
pub fn hash_prefix(path: &Path, max_bytes: u64) -> io::Result<String> {
    let file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file.take(max_bytes), &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn prefix_hash_ignores_bytes_past_the_cap() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("big.bin");
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let cap = 1000;
        let before = hash_prefix(&path, cap).unwrap();
        assert_eq!(before, blake3::hash(&data[..cap as usize]).to_hex().to_string());

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"appended tail").unwrap();
        drop(f);
        assert_eq!(hash_prefix(&path, cap).unwrap(), before);

        // Under the cap the whole file counts.
        assert_eq!(
            hash_prefix(&path, HASH_CAP_BYTES).unwrap(),
            blake3::hash(&fs::read(&path).unwrap()).to_hex().to_string()
        );
    }

    #[test]
    fn growth_past_the_real_cap_keeps_the_digest() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("huge.bin");
        fs::write(&path, b"header bytes").unwrap();
        // Sparse: only the header occupies disk.
        let f = fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(HASH_CAP_BYTES + 4096).unwrap();
        drop(f);

        let before = hash_prefix(&path, HASH_CAP_BYTES).unwrap();

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"trailer that lies past the cap").unwrap();
        drop(f);
        assert_eq!(hash_prefix(&path, HASH_CAP_BYTES).unwrap(), before);

        // A change inside the cap does show.
        let mut f = fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.write_all(b"HEADER").unwrap();
        drop(f);
        assert_ne!(hash_prefix(&path, HASH_CAP_BYTES).unwrap(), before);
    }

    #[test]
    fn prefix_hash_fails_for_vanished_file() {
        let temp = tempfile::tempdir().unwrap();
        assert!(hash_prefix(&temp.path().join("gone"), HASH_CAP_BYTES).is_err());
    }

    #[test]
    fn sniff_prefers_content_then_extension() {
        let temp = tempfile::tempdir().unwrap();
        let png = temp.path().join("really_png.txt");
        image::RgbImage::new(2, 2)
            .save_with_format(&png, image::ImageFormat::Png)
            .unwrap();
        assert_eq!(sniff_mime(&png, "txt").as_deref(), Some("image/png"));

        let txt = temp.path().join("notes.txt");
        fs::write(&txt, "hello").unwrap();
        assert_eq!(sniff_mime(&txt, "txt").as_deref(), Some("text/plain"));

        let odd = temp.path().join("blob");
        fs::write(&odd, "hello").unwrap();
        assert_eq!(sniff_mime(&odd, ""), None);
    }

    #[test]
    fn dimensions_of_generated_image() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("p.png");
        image::RgbImage::new(7, 3).save(&path).unwrap();
        assert_eq!(image_dimensions(&path), Some((7, 3)));

        let junk = temp.path().join("junk.png");
        fs::write(&junk, "not an image").unwrap();
        assert_eq!(image_dimensions(&junk), None);
    }

    #[test]
    fn exif_datetime_parsing() {
        assert_eq!(parse_exif_datetime("1970:01:01 00:01:40"), Some(100));
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
    }
}
