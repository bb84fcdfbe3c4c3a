//! Cookie codec.
//!
//! Flows installed by the engine carry a cookie whose top byte is the
//! engine's owner tag and whose low 56 bits come from the switch's
//! datapath id. Ownership of any cookie can then be checked without a
//! lookup.

use thiserror::Error;

/// Mask selecting the owner tag byte.
pub const OWNER_TAG_MASK: u64 = 0xFF00_0000_0000_0000;

/// Cookie mask matching a cookie exactly.
pub const COOKIE_MASK_ALL: u64 = u64::MAX;

const SWITCH_BITS_MASK: u64 = !OWNER_TAG_MASK;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid switch id {0:?}: expected colon-separated hex of at most 64 bits")]
pub struct InvalidSwitchId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieCodec {
    owner_tag: u8,
}

impl CookieCodec {
    pub fn new(owner_tag: u8) -> Self {
        Self { owner_tag }
    }

    pub fn owner_tag(&self) -> u8 {
        self.owner_tag
    }

    /// Cookie for flows this engine installs on `switch`.
    pub fn cookie_for(&self, switch: &str) -> Result<u64, InvalidSwitchId> {
        let dpid = parse_dpid(switch)?;
        Ok((dpid & SWITCH_BITS_MASK) | self.tag_bits())
    }

    /// Whether `cookie` was produced by this codec's owner tag.
    pub fn owns(&self, cookie: u64) -> bool {
        cookie & OWNER_TAG_MASK == self.tag_bits()
    }

    fn tag_bits(&self) -> u64 {
        u64::from(self.owner_tag) << 56
    }
}

impl Default for CookieCodec {
    fn default() -> Self {
        Self::new(0xAD)
    }
}

fn parse_dpid(switch: &str) -> Result<u64, InvalidSwitchId> {
    let hex: String = switch.chars().filter(|c| *c != ':').collect();
    if hex.is_empty() || hex.len() > 16 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(InvalidSwitchId(switch.to_string()));
    }
    u64::from_str_radix(&hex, 16).map_err(|_| InvalidSwitchId(switch.to_string()))
}
