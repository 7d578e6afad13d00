//! # Domain Value Objects
//!
//! Immutable value types for On-Demand Retrieval: peer identity, time,
//! request kinds and payloads, server addresses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::invariants::CHT_SECTION_SIZE;

/// Hash type alias (32 bytes)
pub type Hash = [u8; 32];

/// Unique identifier of a remote server peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Create a peer ID from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the ID.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| e.to_string())?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("expected 32 bytes, got {}", v.len()))?;
        Ok(Self(bytes))
    }
}

/// Wall-clock timestamp in milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since epoch.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`; zero if the clock went backwards.
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// This timestamp shifted forward by `duration`.
    pub fn add(&self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration.as_millis() as u64))
    }
}

/// Category of retrieval request, used for per-type value tracking and
/// cost accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestKind {
    /// Header range by number or hash.
    BlockHeaders,
    /// Block bodies.
    BlockBodies,
    /// Transaction receipts of a block.
    Receipts,
    /// Contract code.
    Code,
    /// State or storage trie proofs.
    TrieProofs,
    /// CHT / bloom trie proofs.
    HelperTrieProofs,
    /// Transaction inclusion status.
    TxStatus,
}

impl RequestKind {
    /// Every request kind, in a fixed order.
    pub const ALL: [RequestKind; 7] = [
        RequestKind::BlockHeaders,
        RequestKind::BlockBodies,
        RequestKind::Receipts,
        RequestKind::Code,
        RequestKind::TrieProofs,
        RequestKind::HelperTrieProofs,
        RequestKind::TxStatus,
    ];

    /// Default relative cost when a server does not advertise one.
    pub fn default_cost(&self) -> RequestCost {
        match self {
            RequestKind::BlockHeaders => RequestCost::new(150, 30),
            RequestKind::BlockBodies => RequestCost::new(0, 700),
            RequestKind::Receipts => RequestCost::new(0, 1000),
            RequestKind::Code => RequestCost::new(0, 450),
            RequestKind::TrieProofs => RequestCost::new(0, 600),
            RequestKind::HelperTrieProofs => RequestCost::new(0, 1000),
            RequestKind::TxStatus => RequestCost::new(0, 450),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::BlockHeaders => "headers",
            RequestKind::BlockBodies => "bodies",
            RequestKind::Receipts => "receipts",
            RequestKind::Code => "code",
            RequestKind::TrieProofs => "proofs",
            RequestKind::HelperTrieProofs => "helper_proofs",
            RequestKind::TxStatus => "tx_status",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Relative cost of a request: a fixed base plus a per-item charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCost {
    /// Fixed cost per request.
    pub base: u64,
    /// Cost per requested item.
    pub per_item: u64,
}

impl RequestCost {
    /// Create a cost entry.
    pub const fn new(base: u64, per_item: u64) -> Self {
        Self { base, per_item }
    }

    /// Total cost for `amount` items (at least 1).
    pub fn total(&self, amount: u64) -> u64 {
        self.base
            .saturating_add(self.per_item.saturating_mul(amount.max(1)))
            .max(1)
    }
}

/// Costs advertised by a server for each request kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTable {
    costs: BTreeMap<RequestKind, RequestCost>,
}

impl CostTable {
    /// Empty table; every kind falls back to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised cost for a kind.
    pub fn with_cost(mut self, kind: RequestKind, cost: RequestCost) -> Self {
        self.costs.insert(kind, cost);
        self
    }

    /// Cost of serving `request`.
    pub fn cost_of(&self, request: &OdrRequest) -> u64 {
        let kind = request.kind();
        self.costs
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_cost())
            .total(request.amount())
    }
}

/// Starting point of a header range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderOrigin {
    /// By block number.
    Number(u64),
    /// By block hash.
    Hash(Hash),
}

/// Typed retrieval payload.
///
/// The wire encoding is left to the transport; this only describes what
/// is wanted and which chain position a server must have reached to
/// answer it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OdrRequest {
    /// A range of headers.
    BlockHeaders {
        /// First header of the range.
        origin: HeaderOrigin,
        /// Number of headers.
        amount: u64,
        /// Headers skipped between returned ones.
        skip: u64,
        /// Walk towards genesis.
        reverse: bool,
    },
    /// The body of one block.
    BlockBody {
        /// Block hash.
        block_hash: Hash,
        /// Block number.
        block_number: u64,
    },
    /// Receipts of one block.
    Receipts {
        /// Block hash.
        block_hash: Hash,
        /// Block number.
        block_number: u64,
    },
    /// Contract code by hash.
    Code {
        /// Block whose state holds the account.
        block_hash: Hash,
        /// Block number.
        block_number: u64,
        /// Code hash.
        code_hash: Hash,
    },
    /// A Merkle proof of an account or storage slot.
    TrieProof {
        /// Block whose state root anchors the proof.
        block_hash: Hash,
        /// Block number.
        block_number: u64,
        /// Account key (hashed address); empty for the account trie itself.
        account_key: Vec<u8>,
        /// Key inside the trie.
        key: Vec<u8>,
    },
    /// A CHT or bloom trie proof.
    HelperTrieProof {
        /// Trie section index.
        section: u64,
        /// Key inside the helper trie.
        key: Vec<u8>,
    },
    /// Inclusion status of transactions.
    TxStatus {
        /// Transaction hashes.
        tx_hashes: Vec<Hash>,
    },
}

impl OdrRequest {
    /// Request category.
    pub fn kind(&self) -> RequestKind {
        match self {
            OdrRequest::BlockHeaders { .. } => RequestKind::BlockHeaders,
            OdrRequest::BlockBody { .. } => RequestKind::BlockBodies,
            OdrRequest::Receipts { .. } => RequestKind::Receipts,
            OdrRequest::Code { .. } => RequestKind::Code,
            OdrRequest::TrieProof { .. } => RequestKind::TrieProofs,
            OdrRequest::HelperTrieProof { .. } => RequestKind::HelperTrieProofs,
            OdrRequest::TxStatus { .. } => RequestKind::TxStatus,
        }
    }

    /// Number of items asked for (used for cost accounting).
    pub fn amount(&self) -> u64 {
        match self {
            OdrRequest::BlockHeaders { amount, .. } => *amount,
            OdrRequest::TxStatus { tx_hashes } => tx_hashes.len() as u64,
            _ => 1,
        }
    }

    /// Lowest head number a server needs to answer this request.
    pub fn required_head(&self) -> Option<u64> {
        match self {
            OdrRequest::BlockHeaders {
                origin: HeaderOrigin::Number(number),
                amount,
                skip,
                reverse,
            } => {
                if *reverse || *amount == 0 {
                    Some(*number)
                } else {
                    let span = (amount - 1).saturating_mul(skip.saturating_add(1));
                    Some(number.saturating_add(span))
                }
            }
            OdrRequest::BlockHeaders { .. } => None,
            OdrRequest::BlockBody { block_number, .. }
            | OdrRequest::Receipts { block_number, .. }
            | OdrRequest::Code { block_number, .. }
            | OdrRequest::TrieProof { block_number, .. } => Some(*block_number),
            OdrRequest::HelperTrieProof { section, .. } => {
                Some((section.saturating_add(1)).saturating_mul(CHT_SECTION_SIZE) - 1)
            }
            OdrRequest::TxStatus { .. } => None,
        }
    }
}

/// Dialable server address: node identity plus network endpoint.
///
/// Textual form is `<hex node id>@<host:port>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Node identity.
    pub id: PeerId,
    /// Network endpoint, e.g. `10.0.0.1:30303`.
    pub endpoint: String,
}

impl ServerAddress {
    /// Create an address.
    pub fn new(id: PeerId, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.endpoint)
    }
}

impl FromStr for ServerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, endpoint) = s
            .split_once('@')
            .ok_or_else(|| format!("missing '@' in server address: {s}"))?;
        if endpoint.is_empty() {
            return Err(format!("empty endpoint in server address: {s}"));
        }
        Ok(Self::new(id.parse()?, endpoint))
    }
}

/// Discovery topic a server pool dials for (protocol + network).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Topic of the light protocol on the chain with this genesis.
    pub fn for_protocol(genesis: &Hash, protocol_version: u32) -> Self {
        Self(format!("LES@{}-{}", hex::encode(&genesis[..8]), protocol_version))
    }

    /// Topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
