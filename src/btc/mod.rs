//! Canonical Bitcoin data model shared by every wallet adapter.

mod address;

pub use self::address::{
    DetectedAddressType, detect_address_type, redeem_script_p2sh_p2wpkh, script_pubkey,
    tap_internal_key,
};
use crate::error::WalletAdapterError;
use core::fmt;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    Mainnet,
    Testnet,
    /// signet, regtest or anything the wallet did not tell us about.
    ///
    /// Addresses are decoded with the testnet parameters.
    Unknown,
}

impl BitcoinNetwork {
    pub(crate) fn params(self) -> bitcoin::Network {
        match self {
            Self::Mainnet => bitcoin::Network::Bitcoin,
            Self::Testnet | Self::Unknown => bitcoin::Network::Testnet,
        }
    }
}

impl fmt::Display for BitcoinNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// What an address is meant to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPurpose {
    /// plain bitcoin payments
    Payment,
    Ordinals,
    Brc20,
    Runes,
}

impl AddressPurpose {
    pub const ALL: [AddressPurpose; 4] = [
        AddressPurpose::Payment,
        AddressPurpose::Ordinals,
        AddressPurpose::Brc20,
        AddressPurpose::Runes,
    ];

    /// the purposes an ordinals (taproot) address serves
    pub const INSCRIPTIONS: [AddressPurpose; 3] = [
        AddressPurpose::Ordinals,
        AddressPurpose::Brc20,
        AddressPurpose::Runes,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressType {
    /// legacy
    #[serde(rename = "p2pkh")]
    P2pkh,
    /// nested segwit
    #[serde(rename = "p2sh-p2wpkh")]
    P2shP2wpkh,
    /// native segwit
    #[serde(rename = "p2wpkh")]
    P2wpkh,
    /// taproot
    #[serde(rename = "p2tr")]
    P2tr,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P2pkh => write!(f, "p2pkh"),
            Self::P2shP2wpkh => write!(f, "p2sh-p2wpkh"),
            Self::P2wpkh => write!(f, "p2wpkh"),
            Self::P2tr => write!(f, "p2tr"),
        }
    }
}

/// Spending data that only exists for some address types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "addressType")]
pub enum SpendInfo {
    #[serde(rename = "p2pkh")]
    P2pkh,
    #[serde(rename = "p2sh-p2wpkh", rename_all = "camelCase")]
    P2shP2wpkh {
        #[serde(skip_serializing_if = "Option::is_none")]
        redeem_script: Option<String>,
    },
    #[serde(rename = "p2wpkh")]
    P2wpkh,
    #[serde(rename = "p2tr", rename_all = "camelCase")]
    P2tr {
        #[serde(skip_serializing_if = "Option::is_none")]
        tap_internal_key: Option<String>,
    },
}

impl SpendInfo {
    pub fn address_type(&self) -> AddressType {
        match self {
            Self::P2pkh => AddressType::P2pkh,
            Self::P2shP2wpkh { .. } => AddressType::P2shP2wpkh,
            Self::P2wpkh => AddressType::P2wpkh,
            Self::P2tr { .. } => AddressType::P2tr,
        }
    }
}

/// An address granted by a wallet, in the shape every adapter reports it.
///
/// Build it with [`WalletAddress::derive`]: the address is classified and the
/// script pubkey computed from the address itself, the optional fields of
/// [`SpendInfo`] from the public key when the wallet handed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddress {
    address: String,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: String,
    network: BitcoinNetwork,
    purposes: Vec<AddressPurpose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(flatten)]
    spend: SpendInfo,
}

impl WalletAddress {
    pub fn derive(
        network: BitcoinNetwork,
        address: &str,
        purposes: impl Into<Vec<AddressPurpose>>,
        public_key: Option<&str>,
    ) -> Result<Self, WalletAdapterError> {
        let purposes = purposes.into();
        if purposes.is_empty() {
            return Err(WalletAdapterError::Adapter(format!(
                "Address {address} has no purpose"
            )));
        }

        let spend = match detect_address_type(network, address) {
            DetectedAddressType::P2pkh => SpendInfo::P2pkh,
            DetectedAddressType::P2sh => SpendInfo::P2shP2wpkh {
                redeem_script: public_key
                    .map(|key| decode_public_key(key).and_then(|bytes| redeem_script_p2sh_p2wpkh(&bytes)))
                    .transpose()?
                    .map(|script| hex::encode(script.as_bytes())),
            },
            DetectedAddressType::P2wpkh => SpendInfo::P2wpkh,
            DetectedAddressType::P2tr => SpendInfo::P2tr {
                tap_internal_key: public_key
                    .map(|key| decode_public_key(key).and_then(|bytes| tap_internal_key(&bytes)))
                    .transpose()?
                    .map(|key| hex::encode(key.serialize())),
            },
            detected @ (DetectedAddressType::P2wsh | DetectedAddressType::Unknown) => {
                return Err(WalletAdapterError::UnsupportedAddress {
                    address: address.to_owned(),
                    detected,
                });
            }
        };

        let script_pubkey = hex::encode(script_pubkey(network, address)?.as_bytes());

        Ok(Self {
            address: address.to_owned(),
            script_pubkey,
            network,
            purposes,
            public_key: public_key.map(str::to_owned),
            spend,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// hex encoded output script paying to this address
    pub fn script_pubkey(&self) -> &str {
        &self.script_pubkey
    }

    pub fn network(&self) -> BitcoinNetwork {
        self.network
    }

    pub fn purposes(&self) -> &[AddressPurpose] {
        &self.purposes
    }

    pub fn has_purpose(&self, purpose: AddressPurpose) -> bool {
        self.purposes.contains(&purpose)
    }

    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    pub fn address_type(&self) -> AddressType {
        self.spend.address_type()
    }

    pub fn spend_info(&self) -> &SpendInfo {
        &self.spend
    }

    pub fn redeem_script(&self) -> Option<&str> {
        match &self.spend {
            SpendInfo::P2shP2wpkh { redeem_script } => redeem_script.as_deref(),
            _ => None,
        }
    }

    pub fn tap_internal_key(&self) -> Option<&str> {
        match &self.spend {
            SpendInfo::P2tr { tap_internal_key } => tap_internal_key.as_deref(),
            _ => None,
        }
    }

    /// same address, serving `purposes` instead. `purposes` must not be empty.
    pub(crate) fn with_purposes(mut self, purposes: Vec<AddressPurpose>) -> Self {
        debug_assert!(!purposes.is_empty());
        self.purposes = purposes;
        self
    }

    pub(crate) fn with_public_key(mut self, public_key: Option<String>) -> Self {
        self.public_key = public_key;
        self
    }

    /// replace the spending data, must match the address type
    pub(crate) fn with_spend_info(mut self, spend: SpendInfo) -> Self {
        debug_assert_eq!(spend.address_type(), self.address_type());
        self.spend = spend;
        self
    }
}

fn decode_public_key(public_key: &str) -> Result<Vec<u8>, WalletAdapterError> {
    hex::decode(public_key).map_err(|error| WalletAdapterError::InvalidPublicKey {
        public_key: public_key.to_owned(),
        reason: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // BIP-84 first receive address of the "abandon ... about" mnemonic
    const P2WPKH: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
    const P2WPKH_PUBKEY: &str =
        "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c";
    // BIP-49 test vector
    const P2SH_TESTNET: &str = "2Mww8dCYPUpKHofjgcXcBCEGmniw9CoaiD2";
    const P2SH_PUBKEY: &str =
        "03a1af804ac108a8a51782198c2d034b28bf90c8803f5a53f76276fa69a4eae77f";
    // BIP-86 first receive address
    const P2TR: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";
    const P2TR_INTERNAL_KEY: &str =
        "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115";

    #[test]
    fn derive_native_segwit() {
        let address = WalletAddress::derive(
            BitcoinNetwork::Mainnet,
            P2WPKH,
            vec![AddressPurpose::Payment],
            Some(P2WPKH_PUBKEY),
        )
        .unwrap();

        assert_eq!(address.address_type(), AddressType::P2wpkh);
        assert_eq!(
            address.script_pubkey(),
            "0014c0cebcd6c3d3ca8c75dc5ec62ebe55330ef910e2"
        );
        assert_eq!(address.redeem_script(), None);
        assert_eq!(address.tap_internal_key(), None);
        assert_eq!(address.public_key(), Some(P2WPKH_PUBKEY));
    }

    #[test]
    fn derive_nested_segwit_redeem_script() {
        let address = WalletAddress::derive(
            BitcoinNetwork::Testnet,
            P2SH_TESTNET,
            vec![AddressPurpose::Payment],
            Some(P2SH_PUBKEY),
        )
        .unwrap();

        assert_eq!(address.address_type(), AddressType::P2shP2wpkh);
        assert_eq!(
            address.redeem_script(),
            Some("001438971f73930f6c141d977ac4fd4a727c854935b3")
        );
        assert_eq!(
            address.script_pubkey(),
            "a914336caa13e08b96080a32b5d818d59b4ab3b3674287"
        );
    }

    #[test]
    fn derive_taproot_internal_key() {
        let compressed = format!("02{P2TR_INTERNAL_KEY}");
        let address = WalletAddress::derive(
            BitcoinNetwork::Mainnet,
            P2TR,
            AddressPurpose::INSCRIPTIONS,
            Some(&compressed),
        )
        .unwrap();

        assert_eq!(address.address_type(), AddressType::P2tr);
        assert_eq!(address.tap_internal_key(), Some(P2TR_INTERNAL_KEY));
        assert_eq!(
            address.script_pubkey(),
            "5120a60869f0dbcf1dc659c9cecbaf8050135ea9e8cdc487053f1dc6880949dc684c"
        );
    }

    #[test]
    fn derive_without_public_key_leaves_fields_absent() {
        let address =
            WalletAddress::derive(BitcoinNetwork::Mainnet, P2TR, AddressPurpose::ALL, None)
                .unwrap();

        assert_eq!(address.tap_internal_key(), None);
        assert_eq!(address.public_key(), None);
    }

    #[test]
    fn derive_rejects_p2wsh_and_garbage() {
        let p2wsh = "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3";
        assert_eq!(
            WalletAddress::derive(BitcoinNetwork::Mainnet, p2wsh, AddressPurpose::ALL, None),
            Err(WalletAdapterError::UnsupportedAddress {
                address: p2wsh.to_owned(),
                detected: DetectedAddressType::P2wsh,
            })
        );
        assert!(matches!(
            WalletAddress::derive(BitcoinNetwork::Mainnet, "hello", AddressPurpose::ALL, None),
            Err(WalletAdapterError::UnsupportedAddress {
                detected: DetectedAddressType::Unknown,
                ..
            })
        ));
    }

    #[test]
    fn derive_rejects_empty_purposes() {
        assert!(matches!(
            WalletAddress::derive(BitcoinNetwork::Mainnet, P2WPKH, Vec::new(), None),
            Err(WalletAdapterError::Adapter(_))
        ));
    }

    #[test]
    fn derive_rejects_bad_public_key() {
        assert!(matches!(
            WalletAddress::derive(
                BitcoinNetwork::Mainnet,
                P2TR,
                AddressPurpose::ALL,
                Some("not hex")
            ),
            Err(WalletAdapterError::InvalidPublicKey { .. })
        ));
    }

    #[test]
    fn wallet_address_json() {
        let address = WalletAddress::derive(
            BitcoinNetwork::Testnet,
            P2SH_TESTNET,
            vec![AddressPurpose::Payment],
            Some(P2SH_PUBKEY),
        )
        .unwrap();

        assert_eq!(
            serde_json::to_value(&address).unwrap(),
            json!({
                "address": P2SH_TESTNET,
                "scriptPubKey": "a914336caa13e08b96080a32b5d818d59b4ab3b3674287",
                "network": "testnet",
                "purposes": ["payment"],
                "publicKey": P2SH_PUBKEY,
                "addressType": "p2sh-p2wpkh",
                "redeemScript": "001438971f73930f6c141d977ac4fd4a727c854935b3",
            })
        );
    }
}
