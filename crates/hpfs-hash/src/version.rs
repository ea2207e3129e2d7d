//! Binary version prefix shared by the audit log and hash cache files.
//!
//! Eight bytes: three little-endian `u16` version components followed by two
//! reserved bytes, written at the start of every on-disk file this crate's siblings
//! produce. Grounded in the `version.cpp`/`version.hpp` of the reference implementation
//! this system was distilled from.

/// Current on-disk version. Bump the patch component for compatible format tweaks.
pub const CURRENT_VERSION: (u16, u16, u16) = (1, 0, 0);

/// Serialized length of a version prefix.
pub const VERSION_BYTES_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("version prefix too short: got {0} bytes, need {VERSION_BYTES_LEN}")]
    TooShort(usize),
    #[error("version mismatch: found {found:?}, expected {expected:?}")]
    Mismatch {
        found: (u16, u16, u16),
        expected: (u16, u16, u16),
    },
}

/// Encodes a version tuple into its 8-byte on-disk form.
pub fn encode(version: (u16, u16, u16)) -> [u8; VERSION_BYTES_LEN] {
    let mut bytes = [0u8; VERSION_BYTES_LEN];
    bytes[0..2].copy_from_slice(&version.0.to_le_bytes());
    bytes[2..4].copy_from_slice(&version.1.to_le_bytes());
    bytes[4..6].copy_from_slice(&version.2.to_le_bytes());
    // bytes[6..8] stay reserved/zero.
    bytes
}

/// Decodes a version prefix, without checking it against `CURRENT_VERSION`.
pub fn decode(bytes: &[u8]) -> Result<(u16, u16, u16), VersionError> {
    if bytes.len() < VERSION_BYTES_LEN {
        return Err(VersionError::TooShort(bytes.len()));
    }
    let major = u16::from_le_bytes([bytes[0], bytes[1]]);
    let minor = u16::from_le_bytes([bytes[2], bytes[3]]);
    let patch = u16::from_le_bytes([bytes[4], bytes[5]]);
    Ok((major, minor, patch))
}

/// Decodes a version prefix and verifies it matches `CURRENT_VERSION`.
pub fn decode_and_check(bytes: &[u8]) -> Result<(u16, u16, u16), VersionError> {
    let found = decode(bytes)?;
    if found != CURRENT_VERSION {
        return Err(VersionError::Mismatch {
            found,
            expected: CURRENT_VERSION,
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let bytes = encode((3, 7, 21));
        assert_eq!(decode(&bytes).unwrap(), (3, 7, 21));
    }

    #[test]
    fn reserved_bytes_are_zero() {
        let bytes = encode(CURRENT_VERSION);
        assert_eq!(&bytes[6..8], &[0, 0]);
    }

    #[test]
    fn mismatch_is_rejected() {
        let bytes = encode((9, 9, 9));
        assert!(matches!(
            decode_and_check(&bytes),
            Err(VersionError::Mismatch { .. })
        ));
    }
}
