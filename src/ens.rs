use alloy::hex;
use alloy::primitives::{Address, B256, address, keccak256};
use alloy::providers::DynProvider;
use alloy::sol;

sol! {
    #[sol(rpc)]
    contract EnsRegistry {
        function resolver(bytes32 node) external view returns (address);
    }

    #[sol(rpc)]
    contract EnsReverseResolver {
        function name(bytes32 node) external view returns (string);
    }
}

/// The ENS registry, deployed at the same address on mainnet and the
/// public testnets.
pub const ENS_REGISTRY_ADDRESS: Address = address!("0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e");

/// EIP-137 namehash.
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        node = keccak256([node.as_slice(), label_hash.as_slice()].concat());
    }
    node
}

/// Resolves the reverse record (`<address>.addr.reverse`) for an account.
///
/// Best effort: a missing resolver, an empty name, or any RPC failure all
/// yield `None`. Reverse records are frequently unset and repeated lookups
/// are not worth surfacing as errors.
pub async fn lookup_address(provider: &DynProvider, account: Address) -> Option<String> {
    let node = namehash(&format!("{}.addr.reverse", hex::encode(account)));

    let registry = EnsRegistry::new(ENS_REGISTRY_ADDRESS, provider.clone());
    let resolver_address = registry.resolver(node).call().await.ok()?;
    if resolver_address == Address::ZERO {
        return None;
    }

    let resolver = EnsReverseResolver::new(resolver_address, provider.clone());
    let name = resolver.name(node).call().await.ok()?;
    if name.is_empty() { None } else { Some(name) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;

    #[test]
    fn namehash_of_the_empty_name_is_zero() {
        assert_eq!(namehash(""), B256::ZERO);
    }

    #[test]
    fn namehash_matches_the_eip137_vectors() {
        assert_eq!(
            namehash("eth"),
            b256!("0x93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae")
        );
        assert_eq!(
            namehash("foo.eth"),
            b256!("0xde9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f")
        );
    }

    #[test]
    fn reverse_node_uses_unprefixed_lowercase_hex() {
        let account = address!("0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e");
        let reverse = format!("{}.addr.reverse", hex::encode(account));
        assert!(reverse.starts_with("00000000000c2e07"));
        assert!(!reverse.contains("0x"));
    }
}
