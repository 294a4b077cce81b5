use sha2::{Digest, Sha256};

/// Characters that never form words and never look alike (no vowels, no 0/1/3).
const SAFE_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

pub const NODE_INFO_KIND: &str = "Node-Info";

/// Identity of a collection target, hashed into a stable resource-name suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ObjectRef {
    pub fn node_info(node_name: &str, namespace: &str) -> Self {
        ObjectRef {
            kind: NODE_INFO_KIND.to_string(),
            name: node_name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Short identifier that only depends on (kind, name, namespace).
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_bytes());
        hasher.update([0]);
        hasher.update(self.namespace.as_bytes());
        hasher.update([0]);
        hasher.update(self.name.as_bytes());
        let digest = hasher.finalize();

        let sum = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        safe_encode(&sum.to_string())
    }
}

fn safe_encode(s: &str) -> String {
    s.bytes()
        .map(|b| SAFE_ALPHABET[b as usize % SAFE_ALPHABET.len()] as char)
        .collect()
}

/// Job name used by `apply_and_collect`: `<template>-<hash>`.
pub fn collection_job_name(template: &str, node_name: &str, namespace: &str) -> String {
    format!(
        "{}-{}",
        template,
        ObjectRef::node_info(node_name, namespace).compute_hash()
    )
}
