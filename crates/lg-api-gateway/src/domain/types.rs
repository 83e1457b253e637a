//! Wire types shared by registrars, collaborators and the event surface.
//!
//! Byte strings (addresses, keys, signatures) travel as lowercase hex; an
//! optional `0x` prefix is accepted on input.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Longest topic name accepted from a client.
pub const MAX_TOPIC_LEN: usize = 256;

/// Length of an account address in bytes.
pub const ADDRESS_LEN: usize = 20;

// ============================================================================
// Topic / Event
// ============================================================================

/// Named category of node events a client can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Validate and wrap a topic name.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TopicError::Empty);
        }
        if trimmed.len() > MAX_TOPIC_LEN {
            return Err(TopicError::TooLong(trimmed.len()));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(TopicError::ControlCharacter);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Topic::parse(&raw).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("topic must not be empty")]
    Empty,
    #[error("topic is {0} bytes long (max {MAX_TOPIC_LEN})")]
    TooLong(usize),
    #[error("topic must not contain control characters")]
    ControlCharacter,
}

/// A node-originated event. Read-only once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self { topic, payload }
    }
}

// ============================================================================
// Address
// ============================================================================

/// 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        Address::from_slice(&bytes).ok_or_else(|| {
            format!(
                "address must be {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            )
        })
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Decode hex with an optional `0x` prefix.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let stripped = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(stripped).map_err(|e| format!("invalid hex: {}", e))
}

// ============================================================================
// Ledger requests
// ============================================================================

/// Amount of one denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u64,
}

impl Coin {
    fn validate(&self) -> Result<(), String> {
        if self.denom.is_empty() || !self.denom.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("invalid denom '{}'", self.denom));
        }
        if self.amount == 0 {
            return Err(format!("amount for '{}' must be positive", self.denom));
        }
        Ok(())
    }
}

/// Credentials naming a key held by the key manager.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRef {
    pub name: String,
    pub passphrase: String,
}

impl fmt::Debug for SignerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerRef")
            .field("name", &self.name)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /build/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub from: Address,
    pub to: Address,
    pub amount: Vec<Coin>,
    pub sequence: u64,
    #[serde(default)]
    pub fee: Option<Coin>,
    /// When present the built transaction is signed and broadcast.
    #[serde(default)]
    pub signer: Option<SignerRef>,
}

impl SendRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.amount.is_empty() {
            return Err("amount must list at least one coin".into());
        }
        for coin in &self.amount {
            coin.validate()?;
        }
        if let Some(fee) = &self.fee {
            fee.validate()?;
        }
        if self.from == self.to {
            return Err("sender and recipient must differ".into());
        }
        Ok(())
    }

    pub fn build(&self) -> UnsignedTx {
        UnsignedTx {
            kind: "coin/send".into(),
            sequence: self.sequence,
            data: serde_json::json!({
                "from": self.from,
                "to": self.to,
                "amount": self.amount,
                "fee": self.fee,
            }),
        }
    }
}

/// Body of `POST /build/create_role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    pub role: String,
    pub min_sigs: u32,
    pub signers: Vec<Address>,
    pub sequence: u64,
    #[serde(default)]
    pub signer: Option<SignerRef>,
}

impl CreateRoleRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.role.trim().is_empty() {
            return Err("role must not be empty".into());
        }
        if self.signers.is_empty() {
            return Err("signers must not be empty".into());
        }
        if self.min_sigs == 0 || self.min_sigs as usize > self.signers.len() {
            return Err(format!(
                "min_sigs must be between 1 and {}",
                self.signers.len()
            ));
        }
        Ok(())
    }

    pub fn build(&self) -> UnsignedTx {
        UnsignedTx {
            kind: "role/create".into(),
            sequence: self.sequence,
            data: serde_json::json!({
                "role": self.role,
                "min_sigs": self.min_sigs,
                "signers": self.signers,
            }),
        }
    }
}

/// Body of `POST /sign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub name: String,
    pub passphrase: String,
    pub tx: serde_json::Value,
}

// ============================================================================
// Transactions
// ============================================================================

/// A transaction built by the gateway, not yet signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTx {
    #[serde(rename = "type")]
    pub kind: String,
    pub sequence: u64,
    pub data: serde_json::Value,
}

/// Signature produced by the key manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub algo: String,
    pub pub_key: String,
    pub signature: String,
}

/// A transaction body plus its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTx {
    pub tx: serde_json::Value,
    pub signature: Signature,
}

impl SignedTx {
    /// Structural checks only. Signature validity is the node's business.
    pub fn validate(&self) -> Result<(), String> {
        if !self.tx.is_object() {
            return Err("tx must be a JSON object".into());
        }
        if self.signature.algo.is_empty() {
            return Err("signature.algo must not be empty".into());
        }
        let pub_key = decode_hex(&self.signature.pub_key)
            .map_err(|e| format!("signature.pub_key: {}", e))?;
        if pub_key.is_empty() {
            return Err("signature.pub_key must not be empty".into());
        }
        let sig = decode_hex(&self.signature.signature)
            .map_err(|e| format!("signature.signature: {}", e))?;
        if sig.is_empty() {
            return Err("signature.signature must not be empty".into());
        }
        Ok(())
    }
}

/// Canonical bytes a signer signs for a transaction body.
pub fn sign_bytes(tx: &serde_json::Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(tx)
}

/// Node receipt for a broadcast transaction. Returned to clients unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Receipt(pub serde_json::Value);

// ============================================================================
// Keys / node
// ============================================================================

/// Public metadata of a managed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub name: String,
    pub address: Address,
    pub pub_key: String,
    pub algo: String,
}

/// Result of a node state query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub height: u64,
    pub value: serde_json::Value,
}

/// Minimal node status used for the boot probe and `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub network: String,
    pub latest_height: u64,
}
