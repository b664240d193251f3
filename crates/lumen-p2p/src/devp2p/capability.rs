//! Capability negotiation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Message codes 0x00..0x10 belong to devp2p itself.
pub const BASE_PROTOCOL_LENGTH: u64 = 0x10;

/// A protocol a node advertises in its Hello.
///
/// Equality and ordering only look at `(name, version)`; `message_count` is
/// known for our own capabilities and zero for ones decoded off the wire.
#[derive(Clone, Debug)]
pub struct Capability {
    pub name: String,
    pub version: u64,
    pub message_count: u64,
}

impl Capability {
    pub fn new(name: impl Into<String>, version: u64, message_count: u64) -> Self {
        Self {
            name: name.into(),
            version,
            message_count,
        }
    }

    /// A capability as seen in a remote Hello.
    pub fn remote(name: impl Into<String>, version: u64) -> Self {
        Self::new(name, version, 0)
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version
    }
}

impl Eq for Capability {}

impl Hash for Capability {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl PartialOrd for Capability {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Capability {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// A negotiated capability and the absolute message-code range it owns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedCapability {
    pub capability: Capability,
    pub offset: u64,
}

impl SharedCapability {
    pub fn contains(&self, code: u64) -> bool {
        code >= self.offset && code < self.offset + self.capability.message_count
    }
}

/// Intersect `local` and `remote` by `(name, version)`, keep the highest
/// version per name, and lay the survivors out after the devp2p codes in
/// name order.
pub fn shared_capabilities(local: &[Capability], remote: &[Capability]) -> Vec<SharedCapability> {
    let mut best: BTreeMap<&str, &Capability> = BTreeMap::new();
    for capability in local.iter().filter(|cap| remote.contains(*cap)) {
        best.entry(capability.name.as_str())
            .and_modify(|current| {
                if capability.version > current.version {
                    *current = capability;
                }
            })
            .or_insert(capability);
    }

    let mut offset = BASE_PROTOCOL_LENGTH;
    best.into_values()
        .map(|capability| {
            let shared = SharedCapability {
                capability: capability.clone(),
                offset,
            };
            offset += capability.message_count;
            shared
        })
        .collect()
}
