/// 计算 blake3 哈希
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// blake3 哈希的十六进制表示
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3_hash(data))
}

/// Compute a simple binary Merkle root over a list of 32-byte hashes.
/// An empty list hashes to `blake3(b"empty")`.
pub fn merkle_root(hashes: &[[u8; 32]]) -> [u8; 32] {
    if hashes.is_empty() {
        return blake3_hash(b"empty");
    }
    let mut level: Vec<[u8; 32]> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            if let [left, right] = chunk {
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(left);
                combined[32..].copy_from_slice(right);
                next.push(blake3_hash(&combined));
            } else {
                // odd element is promoted
                next.push(chunk[0]);
            }
        }
        level = next;
    }
    level[0]
}
