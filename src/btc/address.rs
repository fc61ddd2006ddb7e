use super::BitcoinNetwork;
use crate::error::WalletAdapterError;
use bitcoin::{
    Address, CompressedPublicKey, ScriptBuf, XOnlyPublicKey, address::NetworkUnchecked,
};
use core::fmt;

/// Address type as read from the address string alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectedAddressType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    Unknown,
}

impl fmt::Display for DetectedAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P2pkh => write!(f, "p2pkh"),
            Self::P2sh => write!(f, "p2sh"),
            Self::P2wpkh => write!(f, "p2wpkh"),
            Self::P2wsh => write!(f, "p2wsh"),
            Self::P2tr => write!(f, "p2tr"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// classify `address` for `network`
///
/// The prefix and length give the candidate type, a full decode (checksum,
/// network and witness program) must then agree with it. Anything else is
/// [`DetectedAddressType::Unknown`].
pub fn detect_address_type(network: BitcoinNetwork, address: &str) -> DetectedAddressType {
    let candidate = classify_prefix(network, address);
    if candidate == DetectedAddressType::Unknown {
        return candidate;
    }

    match decode(network, address).and_then(|address| address.address_type()) {
        Some(bitcoin::AddressType::P2pkh) if candidate == DetectedAddressType::P2pkh => candidate,
        Some(bitcoin::AddressType::P2sh) if candidate == DetectedAddressType::P2sh => candidate,
        Some(bitcoin::AddressType::P2wpkh) if candidate == DetectedAddressType::P2wpkh => {
            candidate
        }
        Some(bitcoin::AddressType::P2wsh) if candidate == DetectedAddressType::P2wsh => candidate,
        Some(bitcoin::AddressType::P2tr) if candidate == DetectedAddressType::P2tr => candidate,
        _ => DetectedAddressType::Unknown,
    }
}

fn classify_prefix(network: BitcoinNetwork, address: &str) -> DetectedAddressType {
    let (pubkey_hash, script_hash, hrp): (&[char], char, &str) = match network {
        BitcoinNetwork::Mainnet => (&['1'], '3', "bc1"),
        BitcoinNetwork::Testnet | BitcoinNetwork::Unknown => (&['m', 'n'], '2', "tb1"),
    };

    let lowercase = address.to_ascii_lowercase();
    if let Some(program) = lowercase.strip_prefix(hrp) {
        return match (program.chars().next(), address.len()) {
            (Some('q'), 42) => DetectedAddressType::P2wpkh,
            (Some('q'), 62) => DetectedAddressType::P2wsh,
            (Some('p'), 62) => DetectedAddressType::P2tr,
            _ => DetectedAddressType::Unknown,
        };
    }

    match address.chars().next() {
        Some(first) if pubkey_hash.contains(&first) => DetectedAddressType::P2pkh,
        Some(first) if first == script_hash => DetectedAddressType::P2sh,
        _ => DetectedAddressType::Unknown,
    }
}

fn decode(network: BitcoinNetwork, address: &str) -> Option<Address> {
    let unchecked = address.parse::<Address<NetworkUnchecked>>().ok()?;
    if unchecked.is_valid_for_network(network.params()) {
        Some(unchecked.assume_checked())
    } else {
        None
    }
}

/// output script paying to `address`
pub fn script_pubkey(network: BitcoinNetwork, address: &str) -> Result<ScriptBuf, WalletAdapterError> {
    decode(network, address)
        .map(|address| address.script_pubkey())
        .ok_or_else(|| WalletAdapterError::UnsupportedAddress {
            address: address.to_owned(),
            detected: DetectedAddressType::Unknown,
        })
}

/// redeem script of a nested segwit (P2SH-P2WPKH) address: the P2WPKH
/// program of the compressed `public_key`.
pub fn redeem_script_p2sh_p2wpkh(public_key: &[u8]) -> Result<ScriptBuf, WalletAdapterError> {
    let public_key =
        CompressedPublicKey::from_slice(public_key).map_err(|error| invalid(public_key, error))?;
    Ok(ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()))
}

/// taproot internal key for `public_key`
///
/// Wallets hand either the 33 bytes compressed key, whose parity byte is
/// dropped, or the 32 bytes x-only key directly.
pub fn tap_internal_key(public_key: &[u8]) -> Result<XOnlyPublicKey, WalletAdapterError> {
    let x_only = match public_key.len() {
        33 => &public_key[1..],
        32 => public_key,
        length => {
            return Err(invalid(
                public_key,
                format!("expected 32 or 33 bytes, got {length}"),
            ));
        }
    };

    XOnlyPublicKey::from_slice(x_only).map_err(|error| invalid(public_key, error))
}

fn invalid(public_key: &[u8], reason: impl fmt::Display) -> WalletAdapterError {
    WalletAdapterError::InvalidPublicKey {
        public_key: hex::encode(public_key),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mainnet(address: &str) -> DetectedAddressType {
        detect_address_type(BitcoinNetwork::Mainnet, address)
    }

    fn testnet(address: &str) -> DetectedAddressType {
        detect_address_type(BitcoinNetwork::Testnet, address)
    }

    #[test]
    fn detect_mainnet() {
        assert_eq!(
            mainnet("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"),
            DetectedAddressType::P2pkh
        );
        assert_eq!(
            mainnet("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"),
            DetectedAddressType::P2sh
        );
        assert_eq!(
            mainnet("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"),
            DetectedAddressType::P2wpkh
        );
        assert_eq!(
            mainnet("bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3"),
            DetectedAddressType::P2wsh
        );
        assert_eq!(
            mainnet("bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr"),
            DetectedAddressType::P2tr
        );
    }

    #[test]
    fn detect_testnet() {
        assert_eq!(
            testnet("2Mww8dCYPUpKHofjgcXcBCEGmniw9CoaiD2"),
            DetectedAddressType::P2sh
        );
        assert_eq!(
            testnet("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"),
            DetectedAddressType::P2wpkh
        );
        assert_eq!(
            testnet("tb1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3q0sl5k7"),
            DetectedAddressType::P2wsh
        );
        assert_eq!(
            testnet("tb1pqqqqp399et2xygdj5xreqhjjvcmzhxw4aywxecjdzew6hylgvsesf3hn0c"),
            DetectedAddressType::P2tr
        );
    }

    #[test]
    fn detect_rejects_wrong_network() {
        assert_eq!(
            testnet("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"),
            DetectedAddressType::Unknown
        );
        assert_eq!(
            mainnet("2Mww8dCYPUpKHofjgcXcBCEGmniw9CoaiD2"),
            DetectedAddressType::Unknown
        );
    }

    #[test]
    fn detect_rejects_malformed() {
        // checksum flipped
        assert_eq!(
            mainnet("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t5"),
            DetectedAddressType::Unknown
        );
        assert_eq!(
            mainnet("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLz"),
            DetectedAddressType::Unknown
        );
        assert_eq!(mainnet(""), DetectedAddressType::Unknown);
        assert_eq!(mainnet("bc1q"), DetectedAddressType::Unknown);
        assert_eq!(
            detect_address_type(
                BitcoinNetwork::Unknown,
                "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080"
            ),
            DetectedAddressType::Unknown
        );
    }

    #[test]
    fn script_pubkeys() {
        assert_eq!(
            script_pubkey(BitcoinNetwork::Mainnet, "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2")
                .unwrap()
                .as_bytes(),
            hex::decode("76a91477bff20c60e522dfaa3350c39b030a5d004e839a88ac").unwrap()
        );
        assert_eq!(
            script_pubkey(BitcoinNetwork::Mainnet, "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy")
                .unwrap()
                .as_bytes(),
            hex::decode("a914b472a266d0bd89c13706a4132ccfb16f7c3b9fcb87").unwrap()
        );
        assert_eq!(
            script_pubkey(
                BitcoinNetwork::Testnet,
                "tb1pqqqqp399et2xygdj5xreqhjjvcmzhxw4aywxecjdzew6hylgvsesf3hn0c"
            )
            .unwrap()
            .as_bytes(),
            hex::decode("5120000000c4a5cad46221b2a187905e5266362b99d5e91c6ce24d165dab93e86433")
                .unwrap()
        );
    }

    #[test]
    fn nested_segwit_redeem_script_hashes_to_address() {
        let public_key =
            hex::decode("03a1af804ac108a8a51782198c2d034b28bf90c8803f5a53f76276fa69a4eae77f")
                .unwrap();
        let redeem_script = redeem_script_p2sh_p2wpkh(&public_key).unwrap();

        assert_eq!(
            ScriptBuf::new_p2sh(&redeem_script.script_hash()),
            script_pubkey(BitcoinNetwork::Testnet, "2Mww8dCYPUpKHofjgcXcBCEGmniw9CoaiD2").unwrap()
        );
    }

    #[test]
    fn tap_internal_key_lengths() {
        let x_only = "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115";
        let compressed = hex::decode(format!("03{x_only}")).unwrap();

        assert_eq!(
            hex::encode(tap_internal_key(&compressed).unwrap().serialize()),
            x_only
        );
        assert_eq!(
            hex::encode(
                tap_internal_key(&hex::decode(x_only).unwrap())
                    .unwrap()
                    .serialize()
            ),
            x_only
        );
        assert!(matches!(
            tap_internal_key(&compressed[..20]),
            Err(WalletAdapterError::InvalidPublicKey { .. })
        ));
    }
}
