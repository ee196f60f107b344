//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::UpdateError;

/// Human readable prefix of storage ids.
pub const STORAGE_ID_HRP: &str = "rev_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, UpdateError> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| UpdateError::Encoding(e.to_string()))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes()).map_err(|e| UpdateError::Encoding(e.to_string()))
}

/// Opaque identity the store stamps on each revision it writes.
pub fn new_storage_id() -> Result<String, UpdateError> {
    new_uuid_to_bech32(STORAGE_ID_HRP)
}
