use gdpck::checksum::checksum;
use gdpck::format::{decode, encode, table_len};
use gdpck::header::{Header, ProducerVersion};
use gdpck::path::{is_normalized, normalize};
use gdpck::{Entry, PckError};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn segment() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_][A-Za-z0-9_ .-]{0,11}".prop_filter("dot segments", |s| s != "." && s != "..")
}

fn entry_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..5).prop_map(|segs| segs.join("/"))
}

/// Contiguous, sorted entries laid out the way a rebuild lays them out.
fn entry_set() -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::btree_map(entry_path(), prop::collection::vec(any::<u8>(), 0..64), 0..12)
        .prop_filter("file used as a directory", |files| {
            files.keys().all(|p| {
                let mut parent = p.as_str();
                while let Some(i) = parent.rfind('/') {
                    parent = &parent[..i];
                    if files.contains_key(parent) {
                        return false;
                    }
                }
                true
            })
        })
        .prop_map(|files: BTreeMap<String, Vec<u8>>| {
            let mut offset = 0;
            files
                .into_iter()
                .map(|(path, data)| {
                    let e = Entry {
                        path,
                        offset,
                        length: data.len() as u64,
                        checksum: checksum(&data),
                        flags: 0,
                    };
                    offset += e.length;
                    e
                })
                .collect()
        })
}

proptest! {
    #[test]
    fn table_decodes_to_what_was_encoded(
        entries in entry_set(),
        major in any::<u32>(),
        flags in any::<u32>(),
    ) {
        let mut header = Header::new(ProducerVersion::new(major, 0, 1), flags);
        header.data_region_offset = table_len(&entries);
        let bytes = encode(&header, &entries).unwrap();
        prop_assert_eq!(bytes.len() as u64, header.data_region_offset);

        let (h, e) = decode(&bytes).unwrap();
        prop_assert_eq!(h, header);
        prop_assert_eq!(e, entries);
    }

    #[test]
    fn normalize_is_idempotent(raw in "(res://)?[/\\\\]?([a-z.]{1,4}[/\\\\]{1,2}){0,4}[a-z]{1,4}") {
        if let Ok(once) = normalize(&raw) {
            prop_assert!(is_normalized(&once));
            prop_assert_eq!(normalize(&once).unwrap(), once);
        }
    }

    #[test]
    fn parent_segments_are_rejected(before in entry_path(), after in entry_path()) {
        let raw = format!("{before}/../{after}");
        let rejected = matches!(normalize(&raw), Err(PckError::InvalidPath { .. }));
        prop_assert!(rejected);
    }
}
