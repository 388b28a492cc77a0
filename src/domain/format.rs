//! Encoded image format sniffing.

use serde::Serialize;

/// Minimum number of bytes needed to recognize a format.
const SIGNATURE_LEN: usize = 12;

/// Encoded image formats recognized from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG (`FF D8`).
    Jpeg,
    /// PNG (`89 50 4E 47`).
    Png,
    /// HEIC / ISO-BMFF (`ftyp` box at offset 4).
    Heic,
    /// WebP (`RIFF....WEBP`).
    Webp,
}

impl ImageFormat {
    /// Detects the format from the leading bytes of an encoded image.
    /// Returns `None` for unknown formats or inputs shorter than 12 bytes.
    #[must_use]
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SIGNATURE_LEN {
            return None;
        }

        if bytes.starts_with(&[0xFF, 0xD8]) {
            return Some(Self::Jpeg);
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Some(Self::Png);
        }
        if &bytes[4..8] == b"ftyp" {
            return Some(Self::Heic);
        }
        if bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            return Some(Self::Webp);
        }

        None
    }

    /// MIME type for this format.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Heic => "image/heic",
            Self::Webp => "image/webp",
        }
    }

    /// Conventional file extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Heic => "heic",
            Self::Webp => "webp",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01], Some(ImageFormat::Jpeg) ; "jpeg")]
    #[test_case(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D], Some(ImageFormat::Png) ; "png")]
    #[test_case(b"\x00\x00\x00\x18ftypheic", Some(ImageFormat::Heic) ; "heic")]
    #[test_case(b"RIFF\x10\x00\x00\x00WEBP", Some(ImageFormat::Webp) ; "webp")]
    #[test_case(b"GIF89a\x00\x00\x00\x00\x00\x00", None ; "unknown")]
    #[test_case(&[0xFF, 0xD8], None ; "too_short")]
    fn test_detect(bytes: &[u8], expected: Option<ImageFormat>) {
        assert_eq!(ImageFormat::detect(bytes), expected);
    }

    #[test]
    fn test_mime_and_extension() {
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
        assert_eq!(ImageFormat::Webp.extension(), "webp");
    }
}
