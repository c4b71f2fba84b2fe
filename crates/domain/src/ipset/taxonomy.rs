use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel returned by name derivations when the set type is unknown.
pub const UNKNOWN: &str = "unknown";

/// Prefix every kernel-visible set name carries, so npset-owned objects
/// can be told apart from anything else living in the packet filter.
pub const KERNEL_NAME_PREFIX: &str = "npset-";

/// Hex characters of the SHA-256 digest kept in a hashed name. Kernel set
/// names are length-restricted; 48 bits is plenty to avoid collisions
/// within one node's set universe.
const HASHED_NAME_LEN: usize = 12;

const CIDR_PREFIX: &str = "cidr-";
const NAMESPACE_PREFIX: &str = "ns-";
const NAMED_PORT_PREFIX: &str = "namedport-";
const POD_LABEL_PREFIX: &str = "podlabel-";
const NAMESPACE_LABEL_PREFIX: &str = "nslabel-";
const NESTED_LABEL_PREFIX: &str = "nestedlabel-";
const EMPTY_SET_PREFIX: &str = "emptyset-";

/// Semantic category of a grouping primitive.
///
/// Each type maps to exactly one [`SetKind`]; the mapping is total and
/// never changes for a given type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetType {
    /// Arrives from deserialized input that predates or postdates this
    /// agent's taxonomy. Non-operational: name derivations return the
    /// `"unknown"` sentinel.
    #[default]
    Unknown,
    /// IPs of all pods in one namespace.
    Namespace,
    /// List of namespace sets sharing a label key.
    KeyLabelOfNamespace,
    /// List of namespace sets sharing a key=value label.
    KeyValueLabelOfNamespace,
    /// IPs of pods carrying a label key.
    KeyLabelOfPod,
    /// IPs of pods carrying a key=value label.
    KeyValueLabelOfPod,
    /// IP:port members for a named container port.
    NamedPorts,
    /// List derived from a multi-value label match expression.
    NestedLabelOfPod,
    /// Literal CIDR block members scoped to one policy.
    CIDRBlocks,
    /// A set deliberately kept empty (deny-all peers).
    EmptyHashSet,
}

impl SetType {
    /// Total, pure mapping from type to dataplane kind.
    pub fn kind(self) -> SetKind {
        match self {
            Self::Namespace
            | Self::KeyLabelOfPod
            | Self::KeyValueLabelOfPod
            | Self::NamedPorts
            | Self::CIDRBlocks
            | Self::EmptyHashSet => SetKind::Hash,
            Self::KeyLabelOfNamespace
            | Self::KeyValueLabelOfNamespace
            | Self::NestedLabelOfPod => SetKind::List,
            Self::Unknown => SetKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => UNKNOWN,
            Self::Namespace => "Namespace",
            Self::KeyLabelOfNamespace => "KeyLabelOfNamespace",
            Self::KeyValueLabelOfNamespace => "KeyValueLabelOfNamespace",
            Self::KeyLabelOfPod => "KeyLabelOfPod",
            Self::KeyValueLabelOfPod => "KeyValueLabelOfPod",
            Self::NamedPorts => "NamedPorts",
            Self::NestedLabelOfPod => "NestedLabelOfPod",
            Self::CIDRBlocks => "CIDRBlocks",
            Self::EmptyHashSet => "EmptySet",
        }
    }
}

impl std::fmt::Display for SetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage shape of a set in the kernel dataplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetKind {
    /// Leaf members: IP addresses, optionally with a port.
    Hash,
    /// Members are other sets.
    List,
    /// Kind of the unknown type.
    Unknown,
}

impl SetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "set",
            Self::List => "list",
            Self::Unknown => UNKNOWN,
        }
    }
}

impl std::fmt::Display for SetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identity of a set as chosen by controllers: a caller-picked
/// name plus its semantic type. All kernel-facing names derive from this
/// pair, deterministically and idempotently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetMetadata {
    pub name: String,
    pub set_type: SetType,
}

impl SetMetadata {
    pub fn new(name: impl Into<String>, set_type: SetType) -> Self {
        Self {
            name: name.into(),
            set_type,
        }
    }

    /// Human-readable name: the canonical per-type prefix plus the logical
    /// name. Returns the `"unknown"` sentinel for the unknown type; the
    /// lifecycle engine reports that as a taxonomy violation, since an
    /// unknown type reaching name derivation is an upstream bug, not a
    /// user-facing error.
    pub fn prefix_name(&self) -> String {
        let prefix = match self.set_type {
            SetType::CIDRBlocks => CIDR_PREFIX,
            SetType::Namespace => NAMESPACE_PREFIX,
            SetType::NamedPorts => NAMED_PORT_PREFIX,
            SetType::KeyLabelOfPod | SetType::KeyValueLabelOfPod => POD_LABEL_PREFIX,
            SetType::KeyLabelOfNamespace | SetType::KeyValueLabelOfNamespace => {
                NAMESPACE_LABEL_PREFIX
            }
            SetType::NestedLabelOfPod => NESTED_LABEL_PREFIX,
            SetType::EmptyHashSet => EMPTY_SET_PREFIX,
            SetType::Unknown => return UNKNOWN.to_string(),
        };
        format!("{prefix}{}", self.name)
    }

    /// Kernel-visible name: `npset-` plus a truncated SHA-256 of the prefix
    /// name. Kernel set naming has length and character restrictions the
    /// logical name cannot honor. SHA-256 keeps the value stable across
    /// restarts and agent versions, so sets created by a prior run stay
    /// addressable. Returns the sentinel whenever `prefix_name` does.
    pub fn hashed_name(&self) -> String {
        let prefixed = self.prefix_name();
        if prefixed == UNKNOWN {
            return UNKNOWN.to_string();
        }
        hashed_name_of(&prefixed)
    }

    pub fn kind(&self) -> SetKind {
        self.set_type.kind()
    }
}

/// Derive the kernel-visible name for an already-prefixed logical name.
pub(crate) fn hashed_name_of(prefixed_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefixed_name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{KERNEL_NAME_PREFIX}{}", &digest[..HASHED_NAME_LEN])
}
