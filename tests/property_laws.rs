// tests/property_laws.rs

//! Property tests for the codec and resolver laws.

use std::collections::BTreeMap;
use std::fs;

use proptest::prelude::*;

use shadowdog::cache::archive::{pack, unpack};
use shadowdog::cache::compute_cache_key;
use shadowdog::resolver::{resolve, IgnoreMatcher};

fn file_name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}\\.txt"
}

fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    proptest::collection::btree_map(
        file_name_strategy(),
        proptest::collection::vec(any::<u8>(), 0..256),
        1..6,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// unpack(pack(dir)) reproduces the directory contents exactly.
    #[test]
    fn pack_unpack_round_trip(files in tree_strategy()) {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("bundle");
        fs::create_dir_all(&src).unwrap();
        for (name, contents) in &files {
            fs::write(src.join(name), contents).unwrap();
        }

        let ignore = IgnoreMatcher::default();
        let archive = pack(&src, &ignore).unwrap();

        let dest = tmp.path().join("out");
        unpack(&archive[..], &dest, &ignore).unwrap();

        for (name, contents) in &files {
            let restored = fs::read(dest.join("bundle").join(name)).unwrap();
            prop_assert_eq!(&restored, contents);
        }
    }

    /// The resolver returns the same sorted file list regardless of the
    /// order patterns are given in, so cache keys are insensitive to
    /// input order.
    #[test]
    fn resolution_and_key_are_order_insensitive(files in tree_strategy()) {
        let tmp = tempfile::tempdir().unwrap();
        for (name, contents) in &files {
            fs::write(tmp.path().join(name), contents).unwrap();
        }

        let mut patterns: Vec<String> = files.keys().cloned().collect();
        let ignore = IgnoreMatcher::default();

        let forward = resolve(tmp.path(), &patterns, &ignore, false).unwrap();
        patterns.reverse();
        let backward = resolve(tmp.path(), &patterns, &ignore, false).unwrap();
        prop_assert_eq!(&forward, &backward);

        let key_forward =
            compute_cache_key(tmp.path(), &forward, &[], "command").unwrap();
        let key_backward =
            compute_cache_key(tmp.path(), &backward, &[], "command").unwrap();
        prop_assert_eq!(key_forward, key_backward);
    }

    /// Keys over an empty file list still vary with the command string.
    #[test]
    fn empty_file_list_key_depends_on_command(command in "[a-z ]{1,20}") {
        let tmp = tempfile::tempdir().unwrap();
        let files: Vec<std::path::PathBuf> = Vec::new();

        let key = compute_cache_key(tmp.path(), &files, &[], &command).unwrap();
        let other = compute_cache_key(tmp.path(), &files, &[], "something else").unwrap();

        prop_assert_eq!(key.len(), 10);
        if command != "something else" {
            prop_assert_ne!(key, other);
        }
    }
}
