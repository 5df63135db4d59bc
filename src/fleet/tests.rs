//! Fleet Module Tests
//!
//! ## Test Scopes
//! - **Hashing**: Digest values and key widths.
//! - **Ring**: Boundary layout, full coverage of the key space, stable lookups.

#[cfg(test)]
mod tests {
    use crate::fleet::hash::{HashKind, Md5Hasher, PathHasher, Sha1Hasher};
    use crate::fleet::router::HashRouter;
    use crate::fleet::types::Node;
    use num_bigint::BigUint;
    use std::collections::HashMap;

    fn fleet(n: u16) -> Vec<Node> {
        (0..n).map(|i| Node::new("127.0.0.1", 7000 + i)).collect()
    }

    // ============================================================
    // HASHING TESTS
    // ============================================================

    #[test]
    fn test_md5_digest_is_read_big_endian() {
        let expected = BigUint::parse_bytes(b"d41d8cd98f00b204e9800998ecf8427e", 16).unwrap();
        assert_eq!(Md5Hasher.hash(""), expected);
        assert_eq!(Md5Hasher.key_bits(), 128);
    }

    #[test]
    fn test_sha1_digest_is_read_big_endian() {
        let expected =
            BigUint::parse_bytes(b"a9993e364706816aba3e25717850c26c9cd0d89d", 16).unwrap();
        assert_eq!(Sha1Hasher.hash("abc"), expected);
        assert_eq!(Sha1Hasher.key_bits(), 160);
    }

    // ============================================================
    // RING TESTS
    // ============================================================

    #[test]
    fn test_lookup_is_pure_and_stable() {
        let router = HashRouter::new(fleet(5), HashKind::Md5.hasher());

        for i in 0..200 {
            let path = format!("/data/run_{}/part.bin", i);
            let first = router.lookup(&path).cloned();
            let second = router.lookup(&path).cloned();
            assert!(first.is_some());
            assert_eq!(first, second, "Lookup must not change between calls");
        }

        // Rebuilding from the same fleet gives the same placement
        let rebuilt = HashRouter::new(fleet(5), HashKind::Md5.hasher());
        assert_eq!(router.lookup("/a/b"), rebuilt.lookup("/a/b"));
    }

    #[test]
    fn test_empty_fleet_has_no_owner() {
        let router = HashRouter::new(Vec::new(), HashKind::Md5.hasher());
        assert!(router.is_empty());
        assert!(router.lookup("/anything").is_none());
    }

    #[test]
    fn test_single_node_owns_everything() {
        let router = HashRouter::new(fleet(1), HashKind::Sha1.hasher());
        let only = Node::new("127.0.0.1", 7000);

        for i in 0..100 {
            assert_eq!(router.lookup(&format!("/f{}", i)), Some(&only));
        }

        let ranges = router.ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].0, BigUint::from(0u32));
        assert_eq!(
            ranges[0].1,
            (BigUint::from(1u32) << 160u32) - BigUint::from(1u32)
        );
    }

    #[test]
    fn test_ranges_cover_key_space_exactly() {
        for kind in [HashKind::Md5, HashKind::Sha1] {
            for n in [2u16, 3, 7, 16] {
                let router = HashRouter::new(fleet(n), kind.hasher());
                let ranges = router.ranges();
                let max = (BigUint::from(1u32) << router.key_bits()) - BigUint::from(1u32);

                assert_eq!(ranges.len(), n as usize);
                assert_eq!(ranges[0].0, BigUint::from(0u32), "Ring must start at 0");
                assert_eq!(ranges.last().unwrap().1, max, "Last range absorbs remainder");

                for pair in ranges.windows(2) {
                    // Contiguous, no gaps, no overlaps
                    assert_eq!(pair[1].0, &pair[0].1 + BigUint::from(1u32));
                    assert!(pair[0].0 <= pair[0].1);
                }
            }
        }
    }

    #[test]
    fn test_boundaries_follow_integer_step() {
        let router = HashRouter::new(fleet(3), HashKind::Md5.hasher());
        let max = (BigUint::from(1u32) << 128u32) - BigUint::from(1u32);
        let step = &max / BigUint::from(3u32);

        let ranges = router.ranges();
        assert_eq!(ranges[0].1, step.clone());
        assert_eq!(ranges[1].1, &step * BigUint::from(2u32));
        assert_eq!(ranges[2].1, max);
    }

    #[test]
    fn test_lookup_matches_owning_range() {
        let router = HashRouter::new(fleet(4), HashKind::Md5.hasher());
        let ranges = router.ranges();

        for i in 0..100 {
            let path = format!("/scratch/{}", i);
            let key = Md5Hasher.hash(&path);
            let owner = router.lookup(&path).unwrap();
            let (start, end, node) = ranges
                .iter()
                .find(|(start, end, _)| *start <= key && key <= *end)
                .unwrap();
            assert!(start <= end);
            assert_eq!(*node, owner);
        }
    }

    #[test]
    fn test_paths_spread_over_fleet() {
        let router = HashRouter::new(fleet(4), HashKind::Md5.hasher());
        let mut counts: HashMap<u16, usize> = HashMap::new();

        for i in 0..4000 {
            let node = router.lookup(&format!("/job/out_{}.dat", i)).unwrap();
            *counts.entry(node.port).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), 4, "Every node should own some paths");
        for (port, count) in counts {
            assert!(count > 600, "Node {} only got {} paths", port, count);
        }
    }

    #[test]
    fn test_node_parses_host_port() {
        let node: Node = "10.0.0.5:9100".parse().unwrap();
        assert_eq!(node, Node::new("10.0.0.5", 9100));
        assert_eq!(node.base_url(), "http://10.0.0.5:9100");
        assert!("nohost".parse::<Node>().is_err());
        assert!(":80".parse::<Node>().is_err());
    }
}
