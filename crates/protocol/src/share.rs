//! Share-send command parsing.
//!
//! A send command looks like
//!
//! ```text
//! @bob @ann ^"/home/mick/cat.png"?"104"
//! ```
//!
//! addressees, a kind marker (`^"` file, `*"` voice), the quoted source
//! path, and a trailing length marker giving the payload byte count.
//! The raw payload follows the command directly on the stream, so the
//! parser also reports how many bytes the header itself occupies.

use crate::command::{has_text_after_addressees, leading_addressees, text_after_addressees};
use crate::tokens::{FILE_SHARE_SEND, LENGTH_MARKER, ShareKind, VOICE_SHARE_SEND};

/// Parsed head of a share-send command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareHeader {
    pub kind: ShareKind,
    /// Unique addressee names, in command order.
    pub addressees: Vec<String>,
    /// Final component of the quoted path.
    pub filename: String,
    /// Extension of the filename, without the dot.
    pub extension: String,
    /// Payload bytes that follow the header on the stream.
    pub payload_len: usize,
    /// Bytes the header occupies on the stream.
    pub header_len: usize,
}

/// Ways a send command can fail to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShareHeaderError {
    #[error("nothing follows the addressee list")]
    MissingPath,
    #[error("share marker is neither file nor voice")]
    UnknownKind,
    #[error("filepath is not quote-terminated")]
    UnterminatedPath,
    #[error("filepath has no path separator")]
    MissingSeparator,
    #[error("filepath ends without a filename")]
    MissingFilename,
    #[error("filename has no extension")]
    MissingExtension,
    #[error("length marker is missing or not a number")]
    BadLengthMarker,
}

/// Parses the previewed head of a share-send command.
///
/// Offsets are byte positions into `preview`, which holds the front of
/// the stream verbatim, so `header_len` is also the number of stream
/// bytes to discard before the payload.
pub fn parse_share_header(preview: &str) -> Result<ShareHeader, ShareHeaderError> {
    if !has_text_after_addressees(preview) {
        return Err(ShareHeaderError::MissingPath);
    }
    let addressees = leading_addressees(preview);

    let rest = text_after_addressees(preview);
    let kind = match rest.as_bytes().first() {
        Some(b'^') => ShareKind::File,
        Some(b'*') => ShareKind::Voice,
        _ => return Err(ShareHeaderError::UnknownKind),
    };
    let marker = match kind {
        ShareKind::File => FILE_SHARE_SEND,
        ShareKind::Voice => VOICE_SHARE_SEND,
    };

    // Addressee tokens cannot contain spaces, so the first occurrence of
    // the space-led marker is the real one.
    let marker_at = preview.find(marker).ok_or(ShareHeaderError::UnknownKind)?;
    let path_start = marker_at + marker.len();
    let path_end = preview[path_start..]
        .find('"')
        .map(|rel| path_start + rel)
        .ok_or(ShareHeaderError::UnterminatedPath)?;
    let path = &preview[path_start..path_end];

    let separator = if path.contains('\\') { '\\' } else { '/' };
    let last_sep = path.rfind(separator).ok_or(ShareHeaderError::MissingSeparator)?;
    let filename = &path[last_sep + 1..];
    if filename.is_empty() {
        return Err(ShareHeaderError::MissingFilename);
    }
    let extension = match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => return Err(ShareHeaderError::MissingExtension),
    };

    let marker_rel = preview[path_end..]
        .find(LENGTH_MARKER)
        .ok_or(ShareHeaderError::BadLengthMarker)?;
    let digits_start = path_end + marker_rel + LENGTH_MARKER.len();
    let digits_end = preview[digits_start..]
        .find('"')
        .map(|rel| digits_start + rel)
        .ok_or(ShareHeaderError::BadLengthMarker)?;
    let payload_len: usize = preview[digits_start..digits_end]
        .parse()
        .map_err(|_| ShareHeaderError::BadLengthMarker)?;

    Ok(ShareHeader {
        kind,
        addressees,
        filename: filename.to_string(),
        extension: extension.to_string(),
        payload_len,
        header_len: digits_end + 1,
    })
}
