// src/protocol/address.rs
use crate::domain::errors::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use crc::{Crc, CRC_16_XMODEM};
use std::fmt;
use std::str::FromStr;

const BOUNCEABLE_TAG: u8 = 0x11;
const NON_BOUNCEABLE_TAG: u8 = 0x51;
const TEST_ONLY_FLAG: u8 = 0x80;

const ADDRESS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Standard internal address: workchain plus 256-bit account id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TonAddress {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl TonAddress {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    /// `wc:hex` form
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// 48-character user-friendly form
    pub fn to_friendly(&self, bounceable: bool, url_safe: bool) -> String {
        let mut bytes = Vec::with_capacity(36);
        bytes.push(if bounceable {
            BOUNCEABLE_TAG
        } else {
            NON_BOUNCEABLE_TAG
        });
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let crc = crc16(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        if url_safe {
            URL_SAFE.encode(bytes)
        } else {
            STANDARD.encode(bytes)
        }
    }

    fn parse_raw(s: &str) -> ProtocolResult<Self> {
        let (wc, account) = s
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidAddress(s.to_string()))?;
        let workchain: i8 = wc
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(format!("bad workchain in {}", s)))?;
        let mut hash = [0u8; 32];
        hex::decode_to_slice(account, &mut hash).map_err(|e| {
            ProtocolError::InvalidAddress(format!("account id must be 64 hex chars: {} ({})", s, e))
        })?;
        Ok(Self::new(workchain, hash))
    }

    fn parse_friendly(s: &str) -> ProtocolResult<Self> {
        if s.len() != 48 {
            return Err(ProtocolError::InvalidAddress(format!(
                "friendly address must be 48 chars: {}",
                s
            )));
        }
        let bytes = if s.contains('-') || s.contains('_') {
            URL_SAFE.decode(s)
        } else {
            STANDARD.decode(s)
        }
        .map_err(|e| ProtocolError::InvalidAddress(format!("{}: {}", s, e)))?;

        if bytes.len() != 36 {
            return Err(ProtocolError::InvalidAddress(s.to_string()));
        }
        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16(&bytes[..34]) != expected {
            return Err(ProtocolError::InvalidAddress(format!("checksum mismatch: {}", s)));
        }
        let tag = bytes[0] & !TEST_ONLY_FLAG;
        if tag != BOUNCEABLE_TAG && tag != NON_BOUNCEABLE_TAG {
            return Err(ProtocolError::InvalidAddress(format!("unknown tag in {}", s)));
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self::new(bytes[1] as i8, hash))
    }
}

impl FromStr for TonAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            Self::parse_raw(s)
        } else {
            Self::parse_friendly(s)
        }
    }
}

impl fmt::Display for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_friendly(true, true))
    }
}

/// Parse helper used throughout the encoders
pub fn parse_address(s: &str) -> ProtocolResult<TonAddress> {
    s.parse()
}

/// True when both strings name the same account, regardless of form or flags
pub fn same_account(a: &str, b: &str) -> bool {
    match (parse_address(a), parse_address(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// CRC16-XMODEM
pub(crate) fn crc16(data: &[u8]) -> u16 {
    ADDRESS_CRC.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STONFI_ROUTER: &str = "EQB3ncyBUTjZUA5EnFKR5_EnOMI9V1tTEAAPaiU71gc4TiUt";
    const USDT_MASTER: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";

    #[test]
    fn parses_and_reprints_mainnet_addresses() {
        for s in [STONFI_ROUTER, USDT_MASTER] {
            let addr: TonAddress = s.parse().unwrap();
            assert_eq!(addr.workchain, 0);
            assert_eq!(addr.to_friendly(true, true), s);
        }
    }

    #[test]
    fn raw_and_friendly_forms_name_the_same_account() {
        let addr: TonAddress = USDT_MASTER.parse().unwrap();
        assert_eq!(
            addr.to_raw(),
            "0:b113a994b5024a16719f69139328eb759596c38a25f59028b146fecdc3621dfe"
        );
        assert_eq!(addr.to_friendly(false, true), "UQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_p0p");
        assert!(same_account(USDT_MASTER, &addr.to_raw()));
        assert!(same_account(USDT_MASTER, "UQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_p0p"));
        assert!(!same_account(USDT_MASTER, STONFI_ROUTER));
    }

    #[test]
    fn rejects_corrupted_checksum_and_garbage() {
        let corrupted = STONFI_ROUTER.replace("TiUt", "TiUA");
        assert!(matches!(
            corrupted.parse::<TonAddress>(),
            Err(ProtocolError::InvalidAddress(_))
        ));
        assert!("not-an-address".parse::<TonAddress>().is_err());
        assert!("0:abcd".parse::<TonAddress>().is_err());
    }

    #[test]
    fn masterchain_raw_address() {
        let raw = format!("-1:{}", "33".repeat(32));
        let addr: TonAddress = raw.parse().unwrap();
        assert_eq!(addr.workchain, -1);
        assert_eq!(addr.to_raw(), raw);
        let friendly = addr.to_friendly(true, false);
        assert_eq!(friendly.parse::<TonAddress>().unwrap(), addr);
    }
}
