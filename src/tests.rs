//! Integration tests for the document engine.
//!
//! Documents written through the engine must read back through the parser
//! byte-for-byte, and the persisted tables must satisfy the format's
//! structural invariants.

use crate::consts::{END_OF_CHAIN, FREE_SECTOR, MSAT_SECTOR, SAT_SECTOR};
use crate::{is_compound_file, Color, CompoundDocument, DirectoryId, Error, EntryType};
use std::io::{Cursor, Write};

type MemDocument = CompoundDocument<Cursor<Vec<u8>>>;

fn create() -> MemDocument {
    CompoundDocument::create(Cursor::new(Vec::new())).unwrap()
}

fn reopen(document: MemDocument) -> MemDocument {
    CompoundDocument::open(document.into_inner()).unwrap()
}

/// Black-height of the subtree at `id`; fails on a red-red edge or an
/// uneven black-height.
fn assert_black_height(document: &MemDocument, id: DirectoryId, parent_red: bool) -> usize {
    if id < 0 {
        return 1;
    }
    let entry = document.entry(id).unwrap();
    let red = entry.color == Color::Red;
    assert!(!(red && parent_red), "red node {} has a red parent", id);

    let left = assert_black_height(document, entry.left, red);
    let right = assert_black_height(document, entry.right, red);
    assert_eq!(left, right, "uneven black-height under {}", id);

    left + usize::from(!red)
}

/// Every stream chain covers exactly its size, through the right table.
fn assert_chain_integrity(document: &MemDocument) {
    let sector_size = document.sector_size();
    let short_size = document.short_sector_size();

    for id in 0..document.entry_count() as DirectoryId {
        let entry = document.entry(id).unwrap().clone();
        match entry.entry_type {
            EntryType::RootStorage => {
                let chain = document.chain(entry.start).unwrap();
                assert_eq!(chain.len(), (entry.size as usize).div_ceil(sector_size));
            },
            EntryType::UserStream => {
                if entry.size < u64::from(document.mini_cutoff()) {
                    let chain = document.short_chain(entry.start).unwrap();
                    assert_eq!(chain.len(), (entry.size as usize).div_ceil(short_size));
                } else {
                    let chain = document.chain(entry.start).unwrap();
                    assert_eq!(chain.len(), (entry.size as usize).div_ceil(sector_size));
                }
            },
            _ => {},
        }
    }
}

/// Every SAT slot holds a sector id or a known sentinel; every page slot
/// appears in the MSAT.
fn assert_table_sentinels(document: &MemDocument) {
    for (index, &slot) in document.sat().iter().enumerate() {
        assert!(
            slot >= 0
                || slot == FREE_SECTOR
                || slot == END_OF_CHAIN
                || slot == SAT_SECTOR
                || slot == MSAT_SECTOR,
            "SAT slot {} holds invalid value {}",
            index,
            slot
        );
        if slot == SAT_SECTOR {
            assert!(
                document.msat().contains(&(index as i32)),
                "SAT page {} missing from the MSAT",
                index
            );
        }
    }
}

#[test]
fn test_empty_document() {
    let mut document = create();
    document.flush().unwrap();
    let data = document.into_inner().into_inner();

    assert!(is_compound_file(&data));
    assert_eq!(u16::from_le_bytes([data[24], data[25]]), 0x003E);
    assert_eq!(u16::from_le_bytes([data[26], data[27]]), 0x0003);
    assert_eq!(u16::from_le_bytes([data[28], data[29]]), 0xFFFE);

    let document = CompoundDocument::open(Cursor::new(data)).unwrap();
    let root = document.root();
    assert_eq!(root.entry_type, EntryType::RootStorage);
    assert_eq!(root.name, "Root Entry");
    assert_eq!(root.start, END_OF_CHAIN);
    assert_eq!(root.size, 0);

    let allocated: Vec<DirectoryId> = (0..document.entry_count() as DirectoryId)
        .filter(|&id| document.entry(id).unwrap().entry_type != EntryType::Empty)
        .collect();
    assert_eq!(allocated, [0]);
}

#[test]
fn test_single_small_stream() {
    let payload: Vec<u8> = (0u8..100).collect();
    let mut document = create();
    document.write_stream("/Workbook", &payload).unwrap();
    document.flush().unwrap();

    let mut document = reopen(document);
    assert_eq!(document.read_stream("/Workbook").unwrap(), payload);

    let id = document
        .find_entry("/Workbook", EntryType::UserStream)
        .unwrap();
    let entry = document.entry(id).unwrap().clone();
    let shorts = document.short_chain(entry.start).unwrap();
    assert_eq!(shorts.len(), 2);
    assert!(document.root().size >= 64);
    assert_chain_integrity(&document);
}

#[test]
fn test_single_large_stream() {
    let payload = vec![0xABu8; 5000];
    let mut document = create();
    document.write_stream("/Big", &payload).unwrap();
    document.flush().unwrap();

    let mut document = reopen(document);
    assert_eq!(document.read_stream("/Big").unwrap(), payload);

    let id = document.find_entry("/Big", EntryType::UserStream).unwrap();
    let entry = document.entry(id).unwrap().clone();
    let chain = document.chain(entry.start).unwrap();
    assert_eq!(chain.len(), 10);
    assert!(document.ssat().is_empty());
    assert_chain_integrity(&document);
}

#[test]
fn test_allocation_growth() {
    let mut document = create();
    for i in 0..200usize {
        let payload = vec![(i % 251) as u8; 4096];
        document
            .write_stream(&format!("/s{:03}", i), &payload)
            .unwrap();
    }
    document.flush().unwrap();

    let mut document = reopen(document);
    for i in 0..200usize {
        let data = document.read_stream(&format!("/s{:03}", i)).unwrap();
        assert_eq!(data.len(), 4096);
        assert!(data.iter().all(|&b| b == (i % 251) as u8));
    }

    assert!(document.msat().len() > 1);
    assert!(document.msat().len() <= 109);
    assert!(document.sat().len() > document.sector_size() / 4);
    assert_table_sentinels(&document);
    assert_chain_integrity(&document);
}

#[test]
fn test_case_insensitive_collision() {
    let mut document = create();
    document.write_stream("/Data", b"payload").unwrap();

    let err = document.write_stream("/DATA", b"other").unwrap_err();
    assert!(matches!(err, Error::DuplicateName(_)));

    let mut document = reopen(document);
    assert_eq!(document.stream_paths(), ["/Data"]);
    assert_eq!(document.read_stream("/Data").unwrap(), b"payload");
}

#[test]
fn test_tree_shape_after_many_inserts() {
    // 31 names, pairwise distinct under ASCII case folding
    let mut names: Vec<String> = ('a'..='m')
        .chain('N'..='Z')
        .chain('0'..='4')
        .map(|c| c.to_string())
        .collect();
    assert_eq!(names.len(), 31);
    let names_len = names.len();
    for i in 0..names_len {
        names.swap(i, (i * 7 + 3) % names_len);
    }

    let mut document = create();
    for name in &names {
        document
            .write_stream(&format!("/{}", name), name.as_bytes())
            .unwrap();
    }
    let document = reopen(document);

    let children = document.children(0);
    assert_eq!(children.len(), 31);

    let child_names: Vec<String> = children
        .iter()
        .map(|&id| document.entry(id).unwrap().name.clone())
        .collect();
    let mut sorted = child_names.clone();
    sorted.sort_by(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
    assert_eq!(child_names, sorted);

    let tree_root = document.root().child;
    assert_eq!(document.entry(tree_root).unwrap().color, Color::Black);
    assert_black_height(&document, tree_root, false);
}

#[test]
fn test_nested_storages() {
    let mut document = create();
    document
        .write_stream("/Storage/Sub/Deep", b"nested bytes")
        .unwrap();
    document.write_stream("/Storage/Shallow", b"one up").unwrap();
    document.flush().unwrap();

    let mut document = reopen(document);
    assert!(document.contains("/Storage", EntryType::UserStorage));
    assert!(document.contains("/Storage/Sub", EntryType::UserStorage));
    assert!(document.contains("/Storage/Sub/Deep", EntryType::UserStream));
    assert!(!document.contains("/Storage/Sub", EntryType::UserStream));

    assert_eq!(document.read_stream("/Storage/Sub/Deep").unwrap(), b"nested bytes");
    assert_eq!(document.read_stream("/Storage/Shallow").unwrap(), b"one up");

    let mut paths = document.stream_paths();
    paths.sort();
    assert_eq!(paths, ["/Storage/Shallow", "/Storage/Sub/Deep"]);
}

#[test]
fn test_overwrite_switches_tier() {
    let mut document = create();
    document.write_stream("/S", b"tiny").unwrap();
    // overwriting with a large payload moves the stream to full sectors
    let large = vec![0x5Au8; 9000];
    document.write_stream("/S", &large).unwrap();

    let mut document = reopen(document);
    assert_eq!(document.read_stream("/S").unwrap(), large);
    assert_eq!(document.stream_paths(), ["/S"]);
    assert_chain_integrity(&document);
}

#[test]
fn test_released_sectors_are_reused() {
    let mut document = create();
    document.write_stream("/A", &vec![1u8; 5000]).unwrap();
    let slots_before = document.sat().len();

    document.write_stream("/A", &vec![2u8; 5000]).unwrap();
    assert_eq!(document.sat().len(), slots_before);

    let mut document = reopen(document);
    assert_eq!(document.read_stream("/A").unwrap(), vec![2u8; 5000]);
}

#[test]
fn test_boundary_at_cutoff() {
    let mut document = create();
    document.write_stream("/JustUnder", &vec![0xAAu8; 4095]).unwrap();
    document.write_stream("/Exactly", &vec![0xBBu8; 4096]).unwrap();
    document.write_stream("/JustOver", &vec![0xCCu8; 4097]).unwrap();
    document.flush().unwrap();

    let mut document = reopen(document);
    assert_eq!(document.read_stream("/JustUnder").unwrap().len(), 4095);
    assert_eq!(document.read_stream("/Exactly").unwrap().len(), 4096);
    assert_eq!(document.read_stream("/JustOver").unwrap().len(), 4097);

    // 4095 bytes sit below the cutoff, 4096 on it
    let under = document.find_entry("/JustUnder", EntryType::UserStream).unwrap();
    let exactly = document.find_entry("/Exactly", EntryType::UserStream).unwrap();
    assert!(document.entry(under).unwrap().size < 4096);
    assert!(document
        .short_chain(document.entry(under).unwrap().start)
        .is_ok());
    assert!(document
        .chain(document.entry(exactly).unwrap().start)
        .is_ok());
    assert_chain_integrity(&document);
}

#[test]
fn test_empty_stream() {
    let mut document = create();
    document.write_stream("/Empty", b"").unwrap();

    let mut document = reopen(document);
    assert_eq!(document.read_stream("/Empty").unwrap(), b"");

    let id = document.find_entry("/Empty", EntryType::UserStream).unwrap();
    assert_eq!(document.entry(id).unwrap().start, END_OF_CHAIN);
    assert_eq!(document.entry(id).unwrap().size, 0);
}

#[test]
fn test_read_missing_stream() {
    let mut document = create();
    document.write_stream("/Present", b"x").unwrap();
    let mut document = reopen(document);

    assert!(matches!(
        document.read_stream("/Absent"),
        Err(Error::NotFound(_))
    ));
    // a storage path is not a stream
    let mut document = {
        let mut w = CompoundDocument::create(Cursor::new(Vec::new())).unwrap();
        w.write_stream("/Dir/Leaf", b"y").unwrap();
        reopen(w)
    };
    assert!(matches!(
        document.read_stream("/Dir"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_name_too_long() {
    let mut document = create();
    let name = "x".repeat(32);
    let err = document.write_stream(&format!("/{}", name), b"z").unwrap_err();
    assert!(matches!(err, Error::NameTooLong(_)));
}

#[test]
fn test_stream_writer_accumulates() {
    let mut document = create();
    {
        let mut stream = document.open_write_stream("/Chunks").unwrap();
        for chunk in 0..10u8 {
            stream.write_all(&[chunk; 100]).unwrap();
        }
        stream.close().unwrap();
    }

    let mut document = reopen(document);
    let data = document.read_stream("/Chunks").unwrap();
    assert_eq!(data.len(), 1000);
    for chunk in 0..10usize {
        assert!(data[chunk * 100..(chunk + 1) * 100]
            .iter()
            .all(|&b| b == chunk as u8));
    }
}

#[test]
fn test_open_read_stream_is_seekable() {
    use std::io::{Read, Seek, SeekFrom};

    let mut document = create();
    document.write_stream("/S", b"0123456789").unwrap();
    let mut document = reopen(document);

    let mut stream = document.open_read_stream("/S").unwrap();
    stream.seek(SeekFrom::Start(4)).unwrap();
    let mut tail = String::new();
    stream.read_to_string(&mut tail).unwrap();
    assert_eq!(tail, "456789");
}

#[test]
fn test_mutations_are_written_through() {
    // no flush call: every mutation persists its own tables
    let mut document = create();
    document.write_stream("/S", b"abc").unwrap();

    let mut document = reopen(document);
    assert_eq!(document.read_stream("/S").unwrap(), b"abc");
}

#[test]
fn test_mini_stream_sizing() {
    let mut document = create();
    for i in 0..5u8 {
        document
            .write_stream(&format!("/m{}", i), &vec![i; 100])
            .unwrap();
    }
    document.flush().unwrap();

    let document = reopen(document);
    let short_size = document.short_sector_size();
    let used = document
        .ssat()
        .iter()
        .rposition(|&slot| slot != FREE_SECTOR)
        .map_or(0, |position| position + 1);
    assert_eq!(document.root().size, (used * short_size) as u64);

    let container = document.chain(document.root().start).unwrap();
    assert_eq!(
        container.len(),
        (document.root().size as usize).div_ceil(document.sector_size())
    );
}

#[test]
fn test_msat_extension_growth() {
    // 7.2 MB needs more SAT pages than the 109 inline MSAT slots hold
    let payload = vec![0x3Cu8; 7_200_000];
    let mut document = create();
    document.write_stream("/Huge", &payload).unwrap();
    document.flush().unwrap();
    assert!(document.msat().len() > 109);

    let mut document = reopen(document);
    assert!(document.msat().len() > 109);
    let data = document.read_stream("/Huge").unwrap();
    assert_eq!(data.len(), payload.len());
    assert!(data == payload);
    assert_table_sentinels(&document);
}

#[test]
fn test_write_to_disk_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("container.bin");

    let file = std::fs::File::create(&path).unwrap();
    let mut document = CompoundDocument::create(file).unwrap();
    document.write_stream("/Workbook", b"on disk").unwrap();
    document.flush().unwrap();
    drop(document);

    let file = std::fs::File::open(&path).unwrap();
    let mut document = CompoundDocument::open(file).unwrap();
    assert_eq!(document.read_stream("/Workbook").unwrap(), b"on disk");
}

#[test]
fn test_root_lookup() {
    let document = reopen(create());
    assert!(document.contains("/", EntryType::RootStorage));
    assert!(document.contains("/Root Entry", EntryType::RootStorage));
    assert_eq!(document.find_entry("/", EntryType::RootStorage), Some(0));
    assert!(!document.contains("/", EntryType::UserStream));
}

#[test]
fn test_open_rejects_garbage() {
    assert!(matches!(
        CompoundDocument::open(Cursor::new(vec![0u8; 2048])),
        Err(Error::BadMagic)
    ));
    assert!(matches!(
        CompoundDocument::open(Cursor::new(vec![0u8; 16])),
        Err(Error::MalformedHeader(_))
    ));
}

#[test]
fn test_open_rejects_truncated_tables() {
    let mut document = create();
    document.write_stream("/S", &vec![7u8; 5000]).unwrap();
    document.flush().unwrap();
    let mut data = document.into_inner().into_inner();

    // chop the file after the header: every SAT page read fails
    data.truncate(600);
    assert!(matches!(
        CompoundDocument::open(Cursor::new(data)),
        Err(Error::TruncatedTable(_))
    ));
}
