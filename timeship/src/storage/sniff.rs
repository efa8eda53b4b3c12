//! Media type detection from leading content bytes.
//!
//! The filesystem records no media types, so they are derived from at most
//! the first 512 bytes of content using the well-known content-sniffing
//! table browsers apply. Matching is deterministic: the first signature
//! that fires wins, and data that contains no binary-looking bytes falls
//! back to `text/plain; charset=utf-8`, everything else to
//! `application/octet-stream`.

/// Number of leading bytes considered for detection.
pub const SNIFF_LEN: usize = 512;

enum Signature {
    /// Byte-for-byte prefix.
    Exact {
        pattern: &'static [u8],
        content_type: &'static str,
    },
    /// Prefix under a mask, optionally after skipping leading whitespace.
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
        skip_ws: bool,
        content_type: &'static str,
    },
    /// Case-insensitive HTML tag after leading whitespace, terminated by
    /// a space or `>`.
    Html { tag: &'static [u8] },
    /// ISO BMFF `ftyp` box carrying an mp4 brand.
    Mp4,
}

const SIGNATURES: &[Signature] = &[
    Signature::Html { tag: b"<!DOCTYPE HTML" },
    Signature::Html { tag: b"<HTML" },
    Signature::Html { tag: b"<HEAD" },
    Signature::Html { tag: b"<SCRIPT" },
    Signature::Html { tag: b"<IFRAME" },
    Signature::Html { tag: b"<H1" },
    Signature::Html { tag: b"<DIV" },
    Signature::Html { tag: b"<FONT" },
    Signature::Html { tag: b"<TABLE" },
    Signature::Html { tag: b"<A" },
    Signature::Html { tag: b"<STYLE" },
    Signature::Html { tag: b"<TITLE" },
    Signature::Html { tag: b"<B" },
    Signature::Html { tag: b"<BODY" },
    Signature::Html { tag: b"<BR" },
    Signature::Html { tag: b"<P" },
    Signature::Html { tag: b"<!--" },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\xFF",
        pattern: b"<?xml",
        skip_ws: true,
        content_type: "text/xml; charset=utf-8",
    },
    Signature::Exact {
        pattern: b"%PDF-",
        content_type: "application/pdf",
    },
    Signature::Exact {
        pattern: b"%!PS-Adobe-",
        content_type: "application/postscript",
    },
    // Unicode byte-order marks.
    Signature::Masked {
        mask: b"\xFF\xFF\x00\x00",
        pattern: b"\xFE\xFF\x00\x00",
        skip_ws: false,
        content_type: "text/plain; charset=utf-16be",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\x00\x00",
        pattern: b"\xFF\xFE\x00\x00",
        skip_ws: false,
        content_type: "text/plain; charset=utf-16le",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\x00",
        pattern: b"\xEF\xBB\xBF\x00",
        skip_ws: false,
        content_type: "text/plain; charset=utf-8",
    },
    Signature::Exact {
        pattern: b"\x00\x00\x01\x00",
        content_type: "image/x-icon",
    },
    Signature::Exact {
        pattern: b"\x00\x00\x02\x00",
        content_type: "image/x-icon",
    },
    Signature::Exact {
        pattern: b"BM",
        content_type: "image/bmp",
    },
    Signature::Exact {
        pattern: b"GIF87a",
        content_type: "image/gif",
    },
    Signature::Exact {
        pattern: b"GIF89a",
        content_type: "image/gif",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WEBPVP",
        skip_ws: false,
        content_type: "image/webp",
    },
    Signature::Exact {
        pattern: b"\x89PNG\r\n\x1a\n",
        content_type: "image/png",
    },
    Signature::Exact {
        pattern: b"\xFF\xD8\xFF",
        content_type: "image/jpeg",
    },
    // Fonts.
    Signature::Exact {
        pattern: b"\x00\x01\x00\x00",
        content_type: "font/ttf",
    },
    Signature::Exact {
        pattern: b"OTTO",
        content_type: "font/otf",
    },
    Signature::Exact {
        pattern: b"ttcf",
        content_type: "font/collection",
    },
    Signature::Exact {
        pattern: b"wOFF",
        content_type: "font/woff",
    },
    Signature::Exact {
        pattern: b"wOF2",
        content_type: "font/woff2",
    },
    // Audio and video.
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"FORM\x00\x00\x00\x00AIFF",
        skip_ws: false,
        content_type: "audio/aiff",
    },
    Signature::Exact {
        pattern: b"ID3",
        content_type: "audio/mpeg",
    },
    Signature::Exact {
        pattern: b"OggS\x00",
        content_type: "application/ogg",
    },
    Signature::Exact {
        pattern: b"MThd\x00\x00\x00\x06",
        content_type: "audio/midi",
    },
    Signature::Exact {
        pattern: b"fLaC",
        content_type: "audio/x-flac",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00AVI ",
        skip_ws: false,
        content_type: "video/avi",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WAVE",
        skip_ws: false,
        content_type: "audio/wave",
    },
    Signature::Mp4,
    Signature::Exact {
        pattern: b"\x1A\x45\xDF\xA3",
        content_type: "video/webm",
    },
    // Archives.
    Signature::Exact {
        pattern: b"\x1F\x8B\x08",
        content_type: "application/x-gzip",
    },
    Signature::Exact {
        pattern: b"PK\x03\x04",
        content_type: "application/zip",
    },
    Signature::Exact {
        pattern: b"Rar!\x1A\x07\x00",
        content_type: "application/x-rar-compressed",
    },
    Signature::Exact {
        pattern: b"Rar!\x1A\x07\x01\x00",
        content_type: "application/x-rar-compressed",
    },
    Signature::Exact {
        pattern: b"\x00asm",
        content_type: "application/wasm",
    },
];

/// Detect the media type of `data` (at most the first [`SNIFF_LEN`] bytes
/// are considered). Always returns a valid media type.
pub fn detect(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    let trimmed = skip_whitespace(data);

    for signature in SIGNATURES {
        let matched = match signature {
            Signature::Exact {
                pattern,
                content_type,
            } => data.starts_with(pattern).then_some(*content_type),
            Signature::Masked {
                mask,
                pattern,
                skip_ws,
                content_type,
            } => {
                let input = if *skip_ws { trimmed } else { data };
                masked_match(input, mask, pattern).then_some(*content_type)
            }
            Signature::Html { tag } => html_match(trimmed, tag),
            Signature::Mp4 => mp4_match(data),
        };
        if let Some(content_type) = matched {
            return content_type;
        }
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b"\t\n\x0c\r ".contains(b))
        .unwrap_or(data.len());
    &data[start..]
}

fn masked_match(data: &[u8], mask: &[u8], pattern: &[u8]) -> bool {
    if data.len() < mask.len() {
        return false;
    }
    mask.iter()
        .zip(pattern)
        .zip(data)
        .all(|((m, p), d)| d & m == *p)
}

fn html_match(data: &[u8], tag: &'static [u8]) -> Option<&'static str> {
    // One byte past the tag must exist and terminate it.
    if data.len() <= tag.len() {
        return None;
    }
    for (d, t) in data.iter().zip(tag) {
        if d.to_ascii_uppercase() != t.to_ascii_uppercase() {
            return None;
        }
    }
    match data[tag.len()] {
        b' ' | b'>' => Some("text/html; charset=utf-8"),
        _ => None,
    }
}

fn mp4_match(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 {
        return None;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if box_size % 4 != 0 || data.len() < box_size || &data[4..8] != b"ftyp" {
        return None;
    }
    let mut offset = 8;
    while offset + 3 < box_size.min(data.len()) {
        // Bytes 8..12 are the major brand, 16.. the compatible brands;
        // 12..16 is the version and is skipped.
        if offset != 12 && &data[offset..offset + 3] == b"mp4" {
            return Some("video/mp4");
        }
        offset += 4;
    }
    None
}

fn is_binary_byte(b: u8) -> bool {
    b <= 0x08
        || b == 0x0B
        || (0x0E..=0x1A).contains(&b)
        || (0x1C..=0x1F).contains(&b)
}
