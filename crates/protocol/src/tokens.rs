//! Wire tokens of the chinwag protocol.
//!
//! Everything on the wire is a raw byte burst with no length prefix or
//! delimiter; these tokens are the in-band markers that give the bytes
//! meaning. Several carry leading spaces or quote characters that are
//! part of the token, not formatting.

/// Liveness probe and its echo. Also sent by a receiver to confirm a
/// share payload arrived in full.
pub const LIVENESS: &str = "{###}";

/// Marks a client-to-server file share inside a send command. The
/// leading space separates it from the addressee list.
pub const FILE_SHARE_SEND: &str = " ^\"";

/// Marks a client-to-server voice share inside a send command.
pub const VOICE_SHARE_SEND: &str = " *\"";

/// Prefix of a share offer pushed to a prospective receiver.
pub const SHARE_OFFER: &str = "^\"\"^";

/// Announces that raw file bytes follow immediately.
pub const FILE_IMMINENT: &str = "^\"\"^-^";

/// Announces that raw voice bytes follow immediately.
pub const VOICE_IMMINENT: &str = "^\"\"^-*";

/// A receiver's answer accepting a pending share offer.
pub const SHARE_ACCEPT: &str = "^-accept";

/// A receiver's answer declining a pending share offer.
pub const SHARE_DECLINE: &str = "^-reject";

/// Opens the trailing length marker of a send command: `?"<bytes>"`.
pub const LENGTH_MARKER: &str = "?\"";

/// Connected-count query.
pub const CMD_COUNT: &str = "-c";
/// Long form of [`CMD_COUNT`].
pub const CMD_COUNT_LONG: &str = "-connections";

/// Name-listing query.
pub const CMD_NAMES: &str = "-n";
/// Long form of [`CMD_NAMES`].
pub const CMD_NAMES_LONG: &str = "-names";

/// Presence search command prefix.
pub const CMD_SEARCH: &str = "-s";
/// Long form of [`CMD_SEARCH`].
pub const CMD_SEARCH_LONG: &str = "-search";

/// Presence update command prefix.
pub const CMD_PRESENCE: &str = "-p";
/// Long form of [`CMD_PRESENCE`].
pub const CMD_PRESENCE_LONG: &str = "-presence";

/// Payload kind carried by a data share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareKind {
    File,
    Voice,
}

impl ShareKind {
    /// Human-readable label used in offers and notices.
    pub fn label(self) -> &'static str {
        match self {
            ShareKind::File => "file",
            ShareKind::Voice => "voice recording",
        }
    }

    /// The marker announcing this kind's raw bytes to a receiver.
    pub fn imminent_marker(self) -> &'static str {
        match self {
            ShareKind::File => FILE_IMMINENT,
            ShareKind::Voice => VOICE_IMMINENT,
        }
    }
}

/// Tokens and commands that may never be claimed as usernames. The
/// server folds these into its illegal-username list so nobody can
/// impersonate a protocol marker.
pub fn reserved_names() -> &'static [&'static str] {
    &[
        LIVENESS,
        FILE_SHARE_SEND,
        VOICE_SHARE_SEND,
        SHARE_OFFER,
        FILE_IMMINENT,
        VOICE_IMMINENT,
        SHARE_ACCEPT,
        SHARE_DECLINE,
        CMD_COUNT,
        CMD_COUNT_LONG,
        CMD_NAMES,
        CMD_NAMES_LONG,
        CMD_SEARCH,
        CMD_SEARCH_LONG,
        CMD_PRESENCE,
        CMD_PRESENCE_LONG,
        "-h",
        "-help",
        "@",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_markers_keep_their_leading_space() {
        assert!(FILE_SHARE_SEND.starts_with(' '));
        assert!(VOICE_SHARE_SEND.starts_with(' '));
    }

    #[test]
    fn imminent_markers_extend_the_offer_prefix() {
        assert!(FILE_IMMINENT.starts_with(SHARE_OFFER));
        assert!(VOICE_IMMINENT.starts_with(SHARE_OFFER));
        assert_ne!(FILE_IMMINENT, VOICE_IMMINENT);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ShareKind::File.label(), "file");
        assert_eq!(ShareKind::Voice.label(), "voice recording");
        assert_eq!(ShareKind::File.imminent_marker(), FILE_IMMINENT);
        assert_eq!(ShareKind::Voice.imminent_marker(), VOICE_IMMINENT);
    }

    #[test]
    fn reserved_names_cover_every_command_form() {
        let reserved = reserved_names();
        for cmd in [
            CMD_COUNT,
            CMD_COUNT_LONG,
            CMD_NAMES,
            CMD_NAMES_LONG,
            CMD_SEARCH,
            CMD_SEARCH_LONG,
            CMD_PRESENCE,
            CMD_PRESENCE_LONG,
        ] {
            assert!(reserved.contains(&cmd), "{cmd} missing from reserved names");
        }
    }
}
