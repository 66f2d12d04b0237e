//! Preview classification.
//!
//! A session decides what to do with a message from its preview alone,
//! before consuming anything from the stream. Checks run most specific
//! first: an addressed message carrying a share marker is a share send
//! even though it would also parse as a private message.

use crate::tokens::{
    CMD_COUNT, CMD_COUNT_LONG, CMD_NAMES, CMD_NAMES_LONG, CMD_PRESENCE, CMD_SEARCH,
    FILE_SHARE_SEND, LIVENESS, SHARE_ACCEPT, SHARE_DECLINE, VOICE_SHARE_SEND,
};

/// What a previewed message turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Nothing but whitespace.
    Empty,
    /// A bare liveness echo arriving outside a probe exchange.
    LivenessEcho,
    /// `-c` / `-connections`.
    CountQuery,
    /// `-n` / `-names`.
    NamesQuery,
    /// The configured shutdown phrase.
    Shutdown,
    /// A share answer arriving with no offer outstanding.
    StrayShareAnswer,
    /// An addressed message carrying a share-send marker.
    ShareSend,
    /// An addressed text message.
    PrivateMessage,
    /// `-s` / `-search` and anything else starting with `-s`.
    SearchQuery,
    /// `-p` / `-presence` and anything else starting with `-p`.
    PresenceUpdate,
    /// Plain text for everyone else.
    Broadcast,
}

/// Classifies a previewed message.
///
/// `shutdown_phrase` takes part only when non-blank. Prefix commands
/// deliberately match loosely (`-s`, `-p`) so malformed variants reach
/// the handler that owns the error reply for them.
pub fn classify(preview: &str, shutdown_phrase: &str) -> MessageKind {
    let trimmed = preview.trim();
    if trimmed.is_empty() {
        return MessageKind::Empty;
    }
    if trimmed == LIVENESS {
        return MessageKind::LivenessEcho;
    }
    if trimmed == CMD_COUNT || trimmed == CMD_COUNT_LONG {
        return MessageKind::CountQuery;
    }
    if trimmed == CMD_NAMES || trimmed == CMD_NAMES_LONG {
        return MessageKind::NamesQuery;
    }
    if !shutdown_phrase.trim().is_empty() && trimmed == shutdown_phrase {
        return MessageKind::Shutdown;
    }
    if trimmed == SHARE_ACCEPT || trimmed == SHARE_DECLINE {
        return MessageKind::StrayShareAnswer;
    }
    if preview.starts_with('@') {
        if preview.contains(FILE_SHARE_SEND) || preview.contains(VOICE_SHARE_SEND) {
            return MessageKind::ShareSend;
        }
        return MessageKind::PrivateMessage;
    }
    if trimmed.starts_with(CMD_SEARCH) {
        return MessageKind::SearchQuery;
    }
    if trimmed.starts_with(CMD_PRESENCE) {
        return MessageKind::PresenceUpdate;
    }
    MessageKind::Broadcast
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(classify("", ""), MessageKind::Empty);
        assert_eq!(classify("   ", ""), MessageKind::Empty);
    }

    #[test]
    fn liveness_echo() {
        assert_eq!(classify("{###}", ""), MessageKind::LivenessEcho);
    }

    #[test]
    fn count_and_names_need_exact_matches() {
        assert_eq!(classify("-c", ""), MessageKind::CountQuery);
        assert_eq!(classify("-connections", ""), MessageKind::CountQuery);
        assert_eq!(classify("-n", ""), MessageKind::NamesQuery);
        assert_eq!(classify("-names", ""), MessageKind::NamesQuery);
        assert_eq!(classify("-c extra", ""), MessageKind::Broadcast);
    }

    #[test]
    fn shutdown_phrase_only_matches_when_configured() {
        assert_eq!(classify("close up shop", "close up shop"), MessageKind::Shutdown);
        assert_eq!(classify("close up shop", ""), MessageKind::Broadcast);
        assert_eq!(classify("", ""), MessageKind::Empty);
    }

    #[test]
    fn share_answers_outside_a_negotiation_are_stray() {
        assert_eq!(classify("^-accept", ""), MessageKind::StrayShareAnswer);
        assert_eq!(classify("^-reject", ""), MessageKind::StrayShareAnswer);
    }

    #[test]
    fn share_marker_wins_over_private_message() {
        assert_eq!(
            classify("@bob ^\"/tmp/cat.png\"?\"104\"", ""),
            MessageKind::ShareSend
        );
        assert_eq!(
            classify("@bob *\"/tmp/note.wav\"?\"99\"", ""),
            MessageKind::ShareSend
        );
        assert_eq!(classify("@bob hello", ""), MessageKind::PrivateMessage);
    }

    #[test]
    fn prefix_commands_match_loosely() {
        assert_eq!(classify("-s @bob", ""), MessageKind::SearchQuery);
        assert_eq!(classify("-search @bob", ""), MessageKind::SearchQuery);
        assert_eq!(classify("-p busy", ""), MessageKind::PresenceUpdate);
        assert_eq!(classify("-presence away", ""), MessageKind::PresenceUpdate);
    }

    #[test]
    fn plain_text_broadcasts() {
        assert_eq!(classify("hello everyone", ""), MessageKind::Broadcast);
        assert_eq!(classify("tea anyone?", ""), MessageKind::Broadcast);
    }
}
