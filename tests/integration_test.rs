use std::fs;
use std::path::{Path, PathBuf};

use m2pack::crypto::{self, BufferFlag};
use m2pack::entry::write_manifest;
use m2pack::error::Error;
use m2pack::header::FileHeader;
use m2pack::stream::encode_fixed;
use m2pack::version::{PackVersion, ALL_VERSIONS};
use m2pack::{Archive, PackEntry};
use tempfile::TempDir;

const USM: &[u8] = b"fake video stream payload, kept seekable";
const PNG: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 1, 2, 3, 4, 5, 6, 7, 8, 9];
const XML: &[u8] = b"<item id=\"1\"><name>Sword</name></item>";

/// Build a three-entry pair covering all three pipelines, then return its
/// paths.  Entries: movie/intro.usm (xor), ui/logo.png (aes),
/// xml/item.xml (aes+zstd).
fn build_pair(dir: &Path, version: PackVersion) -> (PathBuf, PathBuf) {
    let header = dir.join("base.m2h");
    let data = dir.join("base.m2d");

    let mut ar = Archive::create(version);
    ar.add_entry("", PackEntry::new("movie/intro.usm", USM.to_vec())).unwrap();
    ar.add_entry("", PackEntry::new("ui/logo.png", PNG.to_vec())).unwrap();
    ar.add_entry("", PackEntry::new("xml/item.xml", XML.to_vec())).unwrap();
    ar.save(&header, &data, None).unwrap();
    (header, data)
}

#[test]
fn pack_and_reload_roundtrip_every_version() {
    for &version in &ALL_VERSIONS {
        let dir = TempDir::new().unwrap();
        let (header, data) = build_pair(dir.path(), version);

        let mut ar = Archive::open(&header, &data).unwrap();
        assert_eq!(ar.version(), version);
        assert_eq!(ar.len(), 3);

        assert_eq!(ar.read_entry("movie/intro.usm").unwrap(), USM);
        assert_eq!(ar.read_entry("ui/logo.png").unwrap(), PNG);
        assert_eq!(ar.read_entry("xml/item.xml").unwrap(), XML);

        // Flags chosen by the extension heuristic on first save.
        let flag = |p: &str| ar.entry(p).unwrap().header.unwrap().flag;
        assert_eq!(flag("movie/intro.usm"), BufferFlag::Xor);
        assert_eq!(flag("ui/logo.png"), BufferFlag::Aes);
        assert_eq!(flag("xml/item.xml"), BufferFlag::AesZstd);
    }
}

#[test]
fn unchanged_entries_are_copied_verbatim() {
    let dir = TempDir::new().unwrap();
    let (header, data) = build_pair(dir.path(), PackVersion::Os2f);

    let new_xml = b"<item id=\"1\"><name>Axe of Testing</name></item> <!-- padded -->".to_vec();
    let mut ar = Archive::open(&header, &data).unwrap();
    ar.set_entry_data("xml/item.xml", new_xml.clone()).unwrap();

    let out_header = dir.path().join("out.m2h");
    let out_data = dir.path().join("out.m2d");
    let report = ar.save(&out_header, &out_data, None).unwrap();
    assert_eq!(report.entries, 3);

    let src_blob = fs::read(&data).unwrap();
    let dst_blob = fs::read(&out_data).unwrap();

    let before = Archive::open(&header, &data).unwrap();
    let mut after = Archive::open(&out_header, &out_data).unwrap();

    // The two untouched entries keep their exact original ciphertext.
    for path in ["movie/intro.usm", "ui/logo.png"] {
        let old = before.entry(path).unwrap().header.unwrap();
        let new = after.entry(path).unwrap().header.unwrap();
        let old_span = &src_blob[old.offset as usize..(old.offset + old.sizes.encoded) as usize];
        let new_span = &dst_blob[new.offset as usize..(new.offset + new.sizes.encoded) as usize];
        assert_eq!(old_span, new_span, "{path} ciphertext drifted");
        assert_eq!(old.sizes, new.sizes);
    }

    // The modified entry reports its new plaintext length, and the blob
    // length is exactly the sum of the three final encoded sizes.
    let modified = after.entry("xml/item.xml").unwrap().header.unwrap();
    assert_eq!(modified.sizes.raw, new_xml.len() as u64);
    let total: u64 = after.entries().iter().map(|e| e.header.unwrap().sizes.encoded).sum();
    assert_eq!(dst_blob.len() as u64, total);

    assert_eq!(after.read_entry("movie/intro.usm").unwrap(), USM);
    assert_eq!(after.read_entry("ui/logo.png").unwrap(), PNG);
    assert_eq!(after.read_entry("xml/item.xml").unwrap(), new_xml);
}

#[test]
fn save_compacts_indices_and_offsets() {
    let dir = TempDir::new().unwrap();
    let (header, data) = build_pair(dir.path(), PackVersion::Ms2f);

    let mut ar = Archive::open(&header, &data).unwrap();
    ar.add_entry("xml", PackEntry::new("extra.xml", b"<extra/>".to_vec())).unwrap();
    ar.remove_entry("ui/logo.png").unwrap();

    let out_header = dir.path().join("out.m2h");
    let out_data = dir.path().join("out.m2d");
    ar.save(&out_header, &out_data, None).unwrap();

    let after = Archive::open(&out_header, &out_data).unwrap();
    assert_eq!(after.len(), 3);

    // Indices are exactly 1..N and offsets are prefix sums of the encoded
    // sizes, regardless of the gap left by the removal.
    let mut running = 0u64;
    for (i, e) in after.entries().iter().enumerate() {
        let h = e.header.unwrap();
        assert_eq!(e.index, (i + 1) as u32);
        assert_eq!(h.index, e.index);
        assert_eq!(h.offset, running);
        running += h.sizes.encoded;
    }
}

#[test]
fn add_then_remove_restores_entry_count() {
    let dir = TempDir::new().unwrap();
    let (header, data) = build_pair(dir.path(), PackVersion::Ns2f);

    let mut ar = Archive::open(&header, &data).unwrap();
    let before = ar.len();
    ar.add_entry("", PackEntry::new("tmp.bin", vec![1, 2, 3])).unwrap();
    assert_eq!(ar.len(), before + 1);
    ar.remove_entry("tmp.bin").unwrap();
    assert_eq!(ar.len(), before);
}

#[test]
fn duplicate_path_is_rejected() {
    let mut ar = Archive::create(PackVersion::Os2f);
    ar.add_entry("", PackEntry::new("a.xml", b"one".to_vec())).unwrap();
    let err = ar.add_entry("", PackEntry::new("a.xml", b"two".to_vec())).unwrap_err();
    assert!(matches!(err, Error::DuplicateEntry(_)), "got {err:?}");
}

#[test]
fn unknown_magic_fails_with_format_error() {
    let dir = TempDir::new().unwrap();
    let header = dir.path().join("bogus.m2h");
    let data = dir.path().join("bogus.m2d");
    fs::write(&header, b"ZZZF\0\0\0\0\0\0\0\0\0\0\0\0").unwrap();
    fs::write(&data, b"").unwrap();

    let err = Archive::open(&header, &data).unwrap_err();
    assert!(matches!(err, Error::Format(_)), "got {err:?}");
}

#[test]
fn truncated_fixed_header_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let header = dir.path().join("short.m2h");
    fs::write(&header, b"MS2F\x01\x02").unwrap();
    fs::write(dir.path().join("short.m2d"), b"").unwrap();

    let err = Archive::open(&header, dir.path().join("short.m2d")).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "got {err:?}");
}

#[test]
fn out_of_range_table_index_is_corrupt() {
    let version = PackVersion::Os2f;
    let dir = TempDir::new().unwrap();

    // One manifest record, but its table record claims index 5.
    let manifest = write_manifest([(1u32, 0u32, "a.xml")]);
    let (manifest_blob, manifest_sizes) =
        crypto::encrypt(version, BufferFlag::AesZstd, manifest.as_bytes()).unwrap();

    let bogus = FileHeader {
        index: 5,
        flag: BufferFlag::AesZstd,
        offset: 0,
        sizes: Default::default(),
    };
    let mut table = Vec::new();
    bogus.encode(version, &mut table).unwrap();
    let (table_blob, table_sizes) =
        crypto::encrypt(version, BufferFlag::AesZstd, &table).unwrap();

    let mut head = Vec::new();
    encode_fixed(version, 1, &manifest_sizes, &table_sizes, &mut head).unwrap();
    head.extend_from_slice(&manifest_blob);
    head.extend_from_slice(&table_blob);

    let header = dir.path().join("bad.m2h");
    fs::write(&header, head).unwrap();
    fs::write(dir.path().join("bad.m2d"), b"").unwrap();

    let err = Archive::open(&header, dir.path().join("bad.m2d")).unwrap_err();
    match err {
        Error::Corrupt(detail) => assert!(detail.contains('5'), "detail: {detail}"),
        other => panic!("expected Corrupt, got {other:?}"),
    }
}

#[test]
fn cancelled_save_leaves_source_intact() {
    let dir = TempDir::new().unwrap();
    let (header, data) = build_pair(dir.path(), PackVersion::Ps2f);

    let mut ar = Archive::open(&header, &data).unwrap();
    ar.set_entry_data("xml/item.xml", b"<changed/>".to_vec()).unwrap();

    let mut stop_after_one = |done: usize, _total: usize| done < 1;
    let err = ar
        .save(
            dir.path().join("part.m2h"),
            dir.path().join("part.m2d"),
            Some(&mut stop_after_one),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled), "got {err:?}");

    // No header file was written, and the source pair still loads.
    assert!(!dir.path().join("part.m2h").exists());
    let mut again = Archive::open(&header, &data).unwrap();
    assert_eq!(again.read_entry("xml/item.xml").unwrap(), XML);
}

#[test]
fn in_place_save_is_refused() {
    let dir = TempDir::new().unwrap();
    let (header, data) = build_pair(dir.path(), PackVersion::Os2f);

    let mut ar = Archive::open(&header, &data).unwrap();
    let err = ar.save(&header, &data, None).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "got {err:?}");

    // Source still loads afterwards.
    drop(ar);
    Archive::open(&header, &data).unwrap();
}

#[test]
fn second_save_after_edit_stays_consistent() {
    let dir = TempDir::new().unwrap();
    let (header, data) = build_pair(dir.path(), PackVersion::Ms2f);

    let mut ar = Archive::open(&header, &data).unwrap();
    ar.set_entry_data("ui/logo.png", vec![0xAA; 64]).unwrap();
    ar.save(dir.path().join("one.m2h"), dir.path().join("one.m2d"), None).unwrap();

    // The archive still points at the source pair; saving again must keep
    // producing a correct output, verbatim-copying unchanged entries from
    // the original blob.
    ar.save(dir.path().join("two.m2h"), dir.path().join("two.m2d"), None).unwrap();

    let mut two = Archive::open(dir.path().join("two.m2h"), dir.path().join("two.m2d")).unwrap();
    assert_eq!(two.read_entry("movie/intro.usm").unwrap(), USM);
    assert_eq!(two.read_entry("ui/logo.png").unwrap(), vec![0xAA; 64]);
    assert_eq!(two.read_entry("xml/item.xml").unwrap(), XML);
}
