//! Shared constants for the tape wire format and rule identification.

pub const TAPE_MAGIC: u32 = 0x5A4B_5041; // "ZKPA"
pub const TAPE_VERSION: u8 = 1;
pub const RULES_TAG: u8 = 1;
pub const RULESET_NAME: &str = "asteroids-replay-v1";
pub const RULES_DIGEST: u32 = 0x0001_0001;

pub const CLAIMANT_ADDRESS_SIZE: usize = 56;
pub const TAPE_HEADER_SIZE: usize = 16 + CLAIMANT_ADDRESS_SIZE;
pub const TAPE_FOOTER_SIZE: usize = 12;

pub const MAX_FRAMES_DEFAULT: u32 = 18_000;
