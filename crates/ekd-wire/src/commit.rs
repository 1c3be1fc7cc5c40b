//! Git commit payloads and ASCII-armored signature rendering.
//!
//! The GPG shim hands us the commit object Git pipes to its signing
//! program: four whitespace-prefixed header lines (`tree`, `parent`,
//! `author`, `committer`), a blank line, then the message body. The field
//! name token is discarded and the remainder of each line becomes the field
//! value. The engine treats the parsed fields as opaque payload; the device
//! reconstructs the canonical signable byte sequence from them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::b64;
use crate::WireError;

/// Canonical fields of a signable Git commit object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub tree: String,
    pub parent: String,
    pub author: String,
    pub committer: String,
    #[serde(with = "b64")]
    pub message: Vec<u8>,
}

impl CommitInfo {
    /// Parse a commit object as piped to the GPG shim on stdin.
    pub fn parse(input: &[u8]) -> Result<Self, WireError> {
        let mut cursor = input;
        let tree = header_value(&mut cursor, "tree")?;
        let parent = header_value(&mut cursor, "parent")?;
        let author = header_value(&mut cursor, "author")?;
        let committer = header_value(&mut cursor, "committer")?;

        // Headers are followed by exactly one blank line.
        let blank = take_line(&mut cursor).ok_or(WireError::MissingBlankLine)?;
        if !blank.is_empty() {
            return Err(WireError::MissingBlankLine);
        }

        Ok(Self {
            tree,
            parent,
            author,
            committer,
            message: cursor.to_vec(),
        })
    }
}

/// Split off the next line (without its trailing `\n`), advancing `cursor`.
fn take_line<'a>(cursor: &mut &'a [u8]) -> Option<&'a [u8]> {
    if cursor.is_empty() {
        return None;
    }
    match cursor.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            let line = &cursor[..idx];
            *cursor = &cursor[idx + 1..];
            Some(line)
        }
        None => {
            let line = *cursor;
            *cursor = &[];
            Some(line)
        }
    }
}

/// Read one header line, discard its first whitespace-delimited token (the
/// field name), and join the remaining tokens with single spaces.
fn header_value(cursor: &mut &[u8], name: &'static str) -> Result<String, WireError> {
    let line = take_line(cursor).ok_or(WireError::MissingHeader(name))?;
    let line = std::str::from_utf8(line).map_err(|_| WireError::InvalidUtf8)?;
    let mut tokens = line.split_whitespace();
    if tokens.next().is_none() {
        return Err(WireError::EmptyHeader);
    }
    Ok(tokens.collect::<Vec<_>>().join(" "))
}

// ============================================================================
// ASCII armor
// ============================================================================

/// Render a binary signature as an ASCII-armored PGP signature block, the
/// form the GPG shim writes to stdout for Git.
pub fn ascii_armor(signature: &[u8]) -> String {
    let encoded = STANDARD.encode(signature);
    let mut out = String::from("-----BEGIN PGP SIGNATURE-----\n\n");
    for chunk in encoded.as_bytes().chunks(64) {
        // Chunks come from an ASCII base64 string; always valid UTF-8.
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    let crc = crc24(signature);
    let crc_bytes = [(crc >> 16) as u8, (crc >> 8) as u8, crc as u8];
    out.push('=');
    out.push_str(&STANDARD.encode(crc_bytes));
    out.push_str("\n-----END PGP SIGNATURE-----");
    out
}

/// CRC-24 as specified for OpenPGP armor checksums (RFC 4880 §6.1).
fn crc24(data: &[u8]) -> u32 {
    const INIT: u32 = 0xB704CE;
    const POLY: u32 = 0x1864CFB;
    let mut crc = INIT;
    for &byte in data {
        crc ^= (byte as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x1000000 != 0 {
                crc ^= POLY;
            }
        }
    }
    crc & 0xFFFFFF
}
