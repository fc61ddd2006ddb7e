//! Boundary with the PSBT finalizer.
//!
//! Wallets are asked to sign without finalizing: finalization is left to a
//! [`PsbtFinalizer`] supplied by the application so that every wallet
//! returns the same, fully finalized, PSBT.

use crate::error::WalletAdapterError;
use base64::{Engine as _, engine::general_purpose::STANDARD};

/// `psbt` followed by the `0xff` separator
const PSBT_MAGIC: &[u8] = b"psbt\xff";

pub trait PsbtFinalizer {
    /// finalize every signed input of the serialized `psbt`
    fn finalize(&self, psbt: &[u8]) -> Result<Vec<u8>, WalletAdapterError>;
}

impl<F> PsbtFinalizer for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, WalletAdapterError>,
{
    fn finalize(&self, psbt: &[u8]) -> Result<Vec<u8>, WalletAdapterError> {
        self(psbt)
    }
}

fn check_magic(psbt: Vec<u8>) -> Result<Vec<u8>, WalletAdapterError> {
    if psbt.starts_with(PSBT_MAGIC) {
        Ok(psbt)
    } else {
        Err(WalletAdapterError::InvalidPsbt(
            "missing the PSBT magic bytes".to_owned(),
        ))
    }
}

pub(crate) fn decode_hex(psbt: &str) -> Result<Vec<u8>, WalletAdapterError> {
    hex::decode(psbt)
        .map_err(|error| WalletAdapterError::InvalidPsbt(format!("invalid hex: {error}")))
        .and_then(check_magic)
}

pub(crate) fn decode_base64(psbt: &str) -> Result<Vec<u8>, WalletAdapterError> {
    STANDARD
        .decode(psbt)
        .map_err(|error| WalletAdapterError::InvalidPsbt(format!("invalid base64: {error}")))
        .and_then(check_magic)
}

pub(crate) fn hex_to_base64(psbt: &str) -> Result<String, WalletAdapterError> {
    decode_hex(psbt).map(|bytes| STANDARD.encode(bytes))
}

/// finalize a signed PSBT returned by a wallet and hex encode the result
pub(crate) fn finalize(
    finalizer: &dyn PsbtFinalizer,
    signed: Vec<u8>,
) -> Result<String, WalletAdapterError> {
    finalizer.finalize(&signed).map(hex::encode)
}
