//! Steam inspect link grammar.
//!
//! Two forms are accepted, for owned items and market listings:
//!
//! ```text
//! steam://rungame/730/{steamId}/+csgo_econ_action_preview S{owner}A{asset}D{proof}
//! steam://rungame/730/{steamId}/+csgo_econ_action_preview M{market}A{asset}D{proof}
//! ```
//!
//! Links arrive percent-encoded from browsers and market pages; decoding is
//! mandatory. The space before `S`/`M` is commonly `%20`.

use super::InspectDescriptor;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Steam id used in links the gateway formats itself.
const FORMAT_STEAM_ID: u64 = 76561202255233023;

/// Errors from inspect link parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The link does not match the inspect grammar.
    Grammar,
    /// A numeric field overflowed u64.
    Overflow,
    /// Percent-decoding failed (invalid UTF-8 after decode).
    Encoding,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grammar => write!(f, "link does not match the inspect grammar"),
            Self::Overflow => write!(f, "numeric field out of range"),
            Self::Encoding => write!(f, "link is not valid percent-encoded UTF-8"),
        }
    }
}

impl std::error::Error for LinkError {}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^steam://rungame/730/\d+/\+csgo_econ_action_preview ([SM])(\d+)A(\d+)D(\d+)$",
        )
        .expect("inspect link regex is valid")
    })
}

/// Parses a steam inspect link into a descriptor.
///
/// The returned descriptor carries default request flags (`reply=true`,
/// `refresh=false`, `low_priority=false`); flags travel as separate query
/// parameters, not inside the link.
pub fn parse_link(raw: &str) -> Result<InspectDescriptor, LinkError> {
    let decoded = urlencoding::decode(raw.trim()).map_err(|_| LinkError::Encoding)?;

    let caps = link_regex()
        .captures(decoded.as_ref())
        .ok_or(LinkError::Grammar)?;

    let head: u64 = caps[2].parse().map_err(|_| LinkError::Overflow)?;
    let a: u64 = caps[3].parse().map_err(|_| LinkError::Overflow)?;
    let d: u64 = caps[4].parse().map_err(|_| LinkError::Overflow)?;

    let desc = match &caps[1] {
        "S" => InspectDescriptor::owned(head, a, d),
        _ => InspectDescriptor::market(head, a, d),
    };

    if !desc.is_valid() {
        return Err(LinkError::Grammar);
    }
    Ok(desc)
}

/// Formats a descriptor as a canonical (un-encoded) inspect link.
pub fn format_link(desc: &InspectDescriptor) -> String {
    let (tag, head) = if desc.is_market() {
        ('M', desc.m)
    } else {
        ('S', desc.s)
    };
    format!(
        "steam://rungame/730/{}/+csgo_econ_action_preview {}{}A{}D{}",
        FORMAT_STEAM_ID, tag, head, desc.a, desc.d
    )
}
