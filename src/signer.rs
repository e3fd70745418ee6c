// ===============================
// src/signer.rs
// ===============================
//
// Tanda tangan request Aster:
// 1) Parameter di-trim: field null dibuang, struktur nested di-minify jadi
//    string JSON, semua skalar di-stringify.
// 2) Hasil trim diserialisasi sebagai objek JSON dengan key terurut
//    leksikografis tanpa whitespace — byte string inilah yang di-hash.
// 3) keccak256 atas ABI encoding (string, user, signer, uint256 nonce),
//    lalu digest 32-byte ditandatangani sebagai personal message (EIP-191).
//
// Nonce microsecond monotonic ketat: replay protection di sisi exchange
// bergantung pada nonce yang selalu naik dalam satu proses.
//
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ethers_core::abi::{encode, Token};
use ethers_core::types::{Address, U256};
use ethers_core::utils::{hash_message, keccak256};
use ethers_signers::{LocalWallet, Signer, WalletError};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("request params must be a JSON object")]
    NotAnObject,
    #[error("invalid address: {0}")]
    BadAddress(String),
    #[error("invalid signer private key")]
    BadKey,
    #[error("wallet signing failed: {0}")]
    Wallet(#[from] WalletError),
    #[error("canonical serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn timestamp_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

fn timestamp_us() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_micros() as i64
}

/// Nonce microsecond, strictly increasing selama proses hidup — walau jam
/// sistem mundur atau dua panggilan jatuh di microsecond yang sama.
#[derive(Debug, Default)]
pub struct NonceGen {
    last: AtomicI64,
}

impl NonceGen {
    pub fn next(&self) -> i64 {
        let now = timestamp_us();
        loop {
            let prev = self.last.load(Ordering::Acquire);
            let candidate = now.max(prev + 1);
            if self
                .last
                .compare_exchange(prev, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
        }
    }
}

/// Buang field null, minify nested, stringify skalar.
pub fn trim_params(params: &Value) -> Result<BTreeMap<String, String>, SignError> {
    let obj = params.as_object().ok_or(SignError::NotAnObject)?;
    trim_object(obj)
}

fn trim_object(obj: &Map<String, Value>) -> Result<BTreeMap<String, String>, SignError> {
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        let s = match v {
            Value::Null => continue,
            Value::Object(nested) => serde_json::to_string(&trim_object(nested)?)?,
            Value::Array(_) => serde_json::to_string(v)?,
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
        };
        out.insert(k.clone(), s);
    }
    Ok(out)
}

/// Objek JSON minified dengan key terurut (BTreeMap menjamin urutannya).
pub fn canonical_string(fields: &BTreeMap<String, String>) -> Result<String, SignError> {
    Ok(serde_json::to_string(fields)?)
}

pub struct RequestSigner {
    user: Address,
    signer: Address,
    wallet: LocalWallet,
    nonce: NonceGen,
}

impl RequestSigner {
    pub fn new(user: &str, signer: &str, priv_key: &str) -> Result<Self, SignError> {
        let user_addr: Address = user
            .parse()
            .map_err(|_| SignError::BadAddress(user.to_string()))?;
        let signer_addr: Address = signer
            .parse()
            .map_err(|_| SignError::BadAddress(signer.to_string()))?;
        let wallet: LocalWallet = priv_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| SignError::BadKey)?;
        Ok(Self {
            user: user_addr,
            signer: signer_addr,
            wallet,
            nonce: NonceGen::default(),
        })
    }

    pub fn next_nonce(&self) -> i64 {
        self.nonce.next()
    }

    pub fn signer_address(&self) -> Address {
        self.wallet.address()
    }

    /// keccak256(abi.encode(canonical, user, signer, nonce))
    fn signing_digest(&self, canonical: &str, nonce: i64) -> [u8; 32] {
        let encoded = encode(&[
            Token::String(canonical.to_string()),
            Token::Address(self.user),
            Token::Address(self.signer),
            Token::Uint(U256::from(nonce as u64)),
        ]);
        keccak256(encoded)
    }

    /// Personal-sign digest-nya (prefixed message), bukan raw hash signature.
    pub fn sign(&self, canonical: &str, nonce: i64) -> Result<String, SignError> {
        let digest = self.signing_digest(canonical, nonce);
        let sig = self.wallet.sign_hash(hash_message(digest))?;
        Ok(format!("0x{}", hex::encode(sig.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::{RecoveryMessage, Signature};
    use serde_json::json;
    use std::str::FromStr;

    const TEST_KEY: &str = "0x0123456789012345678901234567890123456789012345678901234567890123";
    const TEST_ADDR: &str = "0x1111111111111111111111111111111111111111";

    fn test_signer() -> RequestSigner {
        let wallet: LocalWallet = TEST_KEY.trim_start_matches("0x").parse().unwrap();
        let signer_addr = format!("{:#x}", wallet.address());
        RequestSigner::new(TEST_ADDR, &signer_addr, TEST_KEY).unwrap()
    }

    #[test]
    fn nonce_strictly_increasing() {
        let gen = NonceGen::default();
        let mut prev = gen.next();
        for _ in 0..1000 {
            let n = gen.next();
            assert!(n > prev, "nonce must strictly increase: {} !> {}", n, prev);
            prev = n;
        }
    }

    #[test]
    fn canonical_drops_nulls_sorts_keys_stringifies() {
        let params = json!({
            "symbol": "ASTERUSDT",
            "quantity": 1.5,
            "reduceOnly": false,
            "positionSide": "BOTH",
            "unused": null,
            "timestamp": 1700000000000u64,
        });
        let fields = trim_params(&params).unwrap();
        let canonical = canonical_string(&fields).unwrap();

        // Round-trip: parse ulang sebagai JSON
        let parsed: Value = serde_json::from_str(&canonical).unwrap();
        let obj = parsed.as_object().unwrap();
        assert!(!obj.contains_key("unused"));
        assert!(obj.values().all(|v| v.is_string()));

        let keys: Vec<&String> = obj.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "keys must be lexicographic");

        assert_eq!(obj["reduceOnly"], "false");
        assert_eq!(obj["quantity"], "1.5");
        // Tidak ada whitespace berlebih
        assert!(!canonical.contains(' '));
    }

    #[test]
    fn canonical_minifies_nested_structures() {
        let params = json!({
            "outer": {"b": 2, "a": "x", "skip": null},
            "list": [1, "two"],
        });
        let fields = trim_params(&params).unwrap();
        assert_eq!(fields["outer"], r#"{"a":"x","b":"2"}"#);
        assert_eq!(fields["list"], r#"[1,"two"]"#);
    }

    #[test]
    fn signature_recovers_signer_address() {
        let rs = test_signer();
        let canonical =
            r#"{"recvWindow":"5000","symbol":"ASTERUSDT","timestamp":"1700000000000"}"#;
        let nonce = 1_700_000_000_000_000i64;

        let sig_hex = rs.sign(canonical, nonce).unwrap();
        assert!(sig_hex.starts_with("0x"));
        assert_eq!(sig_hex.len(), 2 + 65 * 2);

        let sig = Signature::from_str(sig_hex.trim_start_matches("0x")).unwrap();
        let digest = rs.signing_digest(canonical, nonce);
        let recovered = sig
            .recover(RecoveryMessage::Data(digest.to_vec()))
            .unwrap();
        assert_eq!(recovered, rs.signer_address());
    }

    #[test]
    fn signature_is_deterministic() {
        let rs = test_signer();
        let a = rs.sign("{}", 42).unwrap();
        let b = rs.sign("{}", 42).unwrap();
        assert_eq!(a, b);
        // nonce berbeda -> digest berbeda -> signature berbeda
        let c = rs.sign("{}", 43).unwrap();
        assert_ne!(a, c);
    }
}
