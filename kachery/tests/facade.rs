//! End-to-end exercises of the facade against a local-only cache: no remote
//! endpoint is configured, so every operation here stays within
//! `store_file`/`load_file`/`read_dir`/`store_dir`/`load_dir` and the local
//! hash cache underneath them (§8).

use serial_test::serial;

fn with_local_cache<F: FnOnce()>(f: F) {
    kachery_config::reset();
    kachery_store::reset_roots();
    let dir = tempfile::tempdir().unwrap();
    kachery_store::set_storage_dir(Some(dir.path().to_path_buf()));
    f();
    kachery_store::reset_roots();
    kachery_config::reset();
}

#[test]
#[serial]
fn store_then_load_file_roundtrips_bytes() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("file.txt");
        std::fs::write(&path, b"abctest").unwrap();

        let uri = kachery::store_file(path.to_str().unwrap(), None, false, false).unwrap();
        assert_eq!(uri, "sha1://69c2c724026dde5fd51e796b3d84fea6aeb6f5f0/file.txt");

        let loaded = kachery::load_file(&uri, None).unwrap().unwrap();
        assert_eq!(std::fs::read(loaded).unwrap(), b"abctest");
    });
}

#[test]
#[serial]
fn store_file_is_idempotent() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("file.txt");
        std::fs::write(&path, b"same content").unwrap();

        let uri1 = kachery::store_file(path.to_str().unwrap(), None, false, false).unwrap();
        let uri2 = kachery::store_file(path.to_str().unwrap(), None, false, false).unwrap();

        let parsed1: kachery::Uri = uri1.parse().unwrap();
        let parsed2: kachery::Uri = uri2.parse().unwrap();
        assert_eq!(parsed1.alg(), parsed2.alg());
        assert_eq!(parsed1.hash(), parsed2.hash());
    });
}

#[test]
#[serial]
fn load_bytes_returns_exact_slice() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("file.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let uri = kachery::store_file(path.to_str().unwrap(), None, false, false).unwrap();

        let whole = kachery::load_bytes(&uri, None, None).unwrap().unwrap();
        assert_eq!(whole, b"0123456789");

        let slice = kachery::load_bytes(&uri, Some(2), Some(5)).unwrap().unwrap();
        assert_eq!(slice, b"234");

        let empty = kachery::load_bytes(&uri, Some(3), Some(3)).unwrap().unwrap();
        assert!(empty.is_empty());
    });
}

#[test]
#[serial]
fn load_bytes_rejects_inverted_range() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("file.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let uri = kachery::store_file(path.to_str().unwrap(), None, false, false).unwrap();
        let result = kachery::load_bytes(&uri, Some(5), Some(3));
        assert!(matches!(result, Err(kachery::Error::Usage(_))));
    });
}

#[test]
#[serial]
fn empty_file_round_trips_without_touching_any_remote() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let uri = kachery::store_file(path.to_str().unwrap(), None, false, false).unwrap();
        let loaded = kachery::load_file(&uri, None).unwrap().unwrap();
        assert_eq!(std::fs::read(loaded).unwrap(), Vec::<u8>::new());
    });
}

#[test]
#[serial]
fn large_file_gets_a_chunk_manifest_that_reconstructs() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        let path = src_dir.path().join("big.bin");
        let data: Vec<u8> = (0..5_000_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let uri_str = kachery::store_file(path.to_str().unwrap(), None, false, false).unwrap();
        let uri: kachery::Uri = uri_str.parse().unwrap();
        let kachery::Uri::File { manifest, .. } = &uri else {
            panic!("expected a file URI");
        };
        let manifest_hash = manifest.clone().expect("file above chunk threshold must carry a manifest");

        let manifest_uri = format!("sha1://{}", manifest_hash.hex());
        let manifest_bytes = kachery::load_bytes(&manifest_uri, None, None).unwrap().unwrap();
        let chunk_manifest: kachery_manifest::ChunkManifest = serde_json::from_slice(&manifest_bytes).unwrap();

        assert_eq!(chunk_manifest.size, data.len() as u64);
        assert_eq!(chunk_manifest.sha1, kachery_digest::hash_bytes(&data, kachery_digest::Alg::Sha1).hex());

        let mut reconstructed = Vec::new();
        for chunk in &chunk_manifest.chunks {
            reconstructed.extend_from_slice(&data[chunk.start as usize..chunk.end as usize]);
        }
        assert_eq!(reconstructed, data);

        let loaded = kachery::load_file(&uri_str, None).unwrap().unwrap();
        assert_eq!(std::fs::read(loaded).unwrap(), data);
    });
}

#[test]
#[serial]
fn directory_round_trips_through_store_dir_read_dir_and_load_dir() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.txt"), b"abctest").unwrap();
        std::fs::create_dir(src_dir.path().join("sub")).unwrap();
        std::fs::write(src_dir.path().join("sub").join("b.txt"), b"nested").unwrap();

        let dir_uri = kachery::store_dir(src_dir.path(), Some("mydata"), false).unwrap();
        assert!(dir_uri.starts_with("sha1dir://"));

        let manifest = kachery::read_dir(&dir_uri, true, false, false).unwrap().unwrap();
        assert_eq!(
            manifest.files["a.txt"].digest.hex(),
            "69c2c724026dde5fd51e796b3d84fea6aeb6f5f0"
        );
        let kachery_manifest::DirSlot::Manifest(sub) = &manifest.dirs["sub"] else {
            panic!("expected an expanded subdirectory");
        };
        assert_eq!(
            sub.files["b.txt"].digest.hex(),
            kachery_digest::hash_bytes(b"nested", kachery_digest::Alg::Sha1).hex()
        );

        let dest_parent = tempfile::tempdir().unwrap();
        let dest = dest_parent.path().join("loaded");
        kachery::load_dir(&dir_uri, &dest).unwrap();

        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"abctest");
        assert_eq!(std::fs::read(dest.join("sub").join("b.txt")).unwrap(), b"nested");

        std::fs::remove_dir_all(&dest).unwrap();
    });
}

#[test]
#[serial]
fn read_dir_non_recursive_collapses_subdirectories() {
    with_local_cache(|| {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.txt"), b"abctest").unwrap();
        std::fs::create_dir(src_dir.path().join("sub")).unwrap();
        std::fs::write(src_dir.path().join("sub").join("b.txt"), b"nested").unwrap();

        let manifest = kachery::read_dir(src_dir.path().to_str().unwrap(), false, false, false)
            .unwrap()
            .unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.dirs["sub"], kachery_manifest::DirSlot::Collapsed);
    });
}

#[test]
#[serial]
fn load_file_of_unknown_digest_returns_none() {
    with_local_cache(|| {
        let uri = format!("sha1://{}", "f".repeat(40));
        assert_eq!(kachery::load_file(&uri, None).unwrap(), None);
    });
}
