//! The account record stored in the state trie.

use primitive_types::{H256, U256};

use crate::trie::{decode_item, RlpEncoder, RlpError, RlpItem, EMPTY_ROOT, HASH_SIZE};

/// Keccak-256 hash of empty code.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
]);

/// An account as persisted in the state trie: the RLP list
/// `[nonce, balance, storage_root, code_hash]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: EMPTY_ROOT,
            code_hash: EMPTY_CODE_HASH,
        }
    }
}

impl Account {
    /// A fresh account: zero nonce and balance, empty storage and code.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the account carries no meaningful state: zero nonce, zero
    /// balance and no code. Empty accounts are pruned at finalization.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == EMPTY_CODE_HASH
    }

    /// Encodes the account for storage in the state trie.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            e.encode_u64(self.nonce);
            let mut balance = [0u8; 32];
            self.balance.to_big_endian(&mut balance);
            e.encode_bytes(trim_leading_zeros(&balance));
            e.encode_bytes(self.storage_root.as_bytes());
            e.encode_bytes(self.code_hash.as_bytes());
        });
        enc.into_bytes()
    }

    /// Decodes an account from its trie value.
    pub fn decode(data: &[u8]) -> Result<Self, RlpError> {
        let item = decode_item(data)?;
        let items = match &item {
            RlpItem::List(items, _) if items.len() == 4 => items,
            _ => return Err(RlpError::Unexpected("account must be a 4-item list")),
        };

        let nonce = items[0].as_u64()?;
        let balance_bytes = items[1].as_bytes()?;
        if balance_bytes.len() > 32 {
            return Err(RlpError::Unexpected("balance wider than 256 bits"));
        }
        let balance = U256::from_big_endian(balance_bytes);
        let storage_root = decode_hash(&items[2])?;
        let code_hash = decode_hash(&items[3])?;

        Ok(Self {
            nonce,
            balance,
            storage_root,
            code_hash,
        })
    }
}

fn decode_hash(item: &RlpItem<'_>) -> Result<H256, RlpError> {
    let bytes = item.as_bytes()?;
    if bytes.len() != HASH_SIZE {
        return Err(RlpError::Unexpected("hash must be 32 bytes"));
    }
    Ok(H256::from_slice(bytes))
}

/// Strips leading zero bytes; RLP integers carry no leading zeros.
pub(crate) fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::keccak256;

    #[test]
    fn test_empty_code_hash_constant() {
        assert_eq!(keccak256(&[]), EMPTY_CODE_HASH);
    }

    #[test]
    fn test_new_account_is_empty() {
        let account = Account::new();
        assert!(account.is_empty());
        assert_eq!(account.storage_root, EMPTY_ROOT);
    }

    #[test]
    fn test_nonempty_markers() {
        let mut account = Account::new();
        account.nonce = 1;
        assert!(!account.is_empty());

        let mut account = Account::new();
        account.balance = U256::from(10);
        assert!(!account.is_empty());

        let mut account = Account::new();
        account.code_hash = keccak256(b"code");
        assert!(!account.is_empty());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let account = Account {
            nonce: 42,
            balance: U256::from(1_000_000_000u64),
            storage_root: keccak256(b"storage"),
            code_hash: keccak256(b"code"),
        };
        let decoded = Account::decode(&account.encode()).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn test_zero_balance_encodes_empty() {
        let encoded = Account::new().encode();
        let decoded = Account::decode(&encoded).unwrap();
        assert!(decoded.balance.is_zero());
        assert_eq!(decoded.nonce, 0);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(Account::decode(&[0x80]).is_err());
        // 3-item list
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            e.encode_u64(1);
            e.encode_u64(2);
            e.encode_u64(3);
        });
        assert!(Account::decode(enc.as_bytes()).is_err());
    }

    #[test]
    fn test_trim_leading_zeros() {
        assert_eq!(trim_leading_zeros(&[0, 0, 1, 0]), &[1, 0]);
        assert_eq!(trim_leading_zeros(&[0, 0]), &[] as &[u8]);
        assert_eq!(trim_leading_zeros(&[5]), &[5]);
    }
}
