#![allow(dead_code)]

use std::io;
use std::io::Read;
use tar::{Builder, EntryType, Header};
use tarfs_fs::{Error, FileKind, Handle, TarFs};

/// In-memory tar writer for test archives.
pub struct TarBuilder {
    builder: Builder<Vec<u8>>,
}

impl TarBuilder {
    pub fn new() -> Self {
        Self {
            builder: Builder::new(Vec::new()),
        }
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        let mut header = header(EntryType::Regular, data.len() as u64, 0o644);
        self.builder.append_data(&mut header, path, data).unwrap();
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        let mut header = header(EntryType::Directory, 0, 0o755);
        self.builder
            .append_data(&mut header, path, io::empty())
            .unwrap();
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        let mut header = header(EntryType::Symlink, 0, 0o777);
        header.set_link_name(target).unwrap();
        self.builder
            .append_data(&mut header, path, io::empty())
            .unwrap();
        self
    }

    pub fn hard_link(mut self, path: &str, target: &str) -> Self {
        let mut header = header(EntryType::Link, 0, 0o644);
        header.set_link_name(target).unwrap();
        self.builder
            .append_data(&mut header, path, io::empty())
            .unwrap();
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }
}

fn header(entry_type: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(1_700_000_000);
    header
}

/// Deterministic non-text content spanning several tar blocks.
pub fn blob(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// The fixture tree: regular files plus a file symlink and a directory
/// symlink. Returns the archive and every readable file path with its
/// expected content, aliases included.
pub fn fixture() -> (Vec<u8>, Vec<(String, Vec<u8>)>) {
    let readme = b"# tarfs fixture\n".to_vec();
    let lib = b"pub mod parse;\n".to_vec();
    let parse = b"pub fn parse() {}\n".to_vec();
    let gitignore = b"*.tar\n".to_vec();
    let data = blob(5000);

    let archive = TarBuilder::new()
        .symlink("latest", "testdata/nested")
        .file("README.md", &readme)
        .dir("src")
        .file("src/lib.rs", &lib)
        .file("src/parse.rs", &parse)
        .dir("testdata")
        .file("testdata/.gitignore", &gitignore)
        .file("testdata/nested/blob.bin", &data)
        .symlink("src/README.md", "../README.md")
        .finish();

    let files = vec![
        ("README.md".to_string(), readme.clone()),
        ("src/README.md".to_string(), readme),
        ("src/lib.rs".to_string(), lib),
        ("src/parse.rs".to_string(), parse),
        ("testdata/.gitignore".to_string(), gitignore),
        ("testdata/nested/blob.bin".to_string(), data.clone()),
        ("latest/blob.bin".to_string(), data),
    ];
    (archive, files)
}

fn parent_and_name(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (".", path),
    }
}

/// Read-side conformance checks: stat, open, read_dir, read_file and walk
/// agree with each other and with the expected file contents.
pub fn check_conformance(fs: &TarFs, files: &[(String, Vec<u8>)]) {
    let root = fs.stat(".").unwrap();
    assert!(root.is_dir());
    assert_eq!(root.name, ".");

    let all = fs.walk(".").unwrap();

    for (path, want) in files {
        let meta = fs.stat(path).unwrap();
        assert!(meta.is_file(), "{} should be a file", path);
        assert_eq!(meta.size, want.len() as u64, "size of {}", path);
        assert_eq!(meta.name, parent_and_name(path).1);

        assert_eq!(&fs.read_file(path).unwrap(), want, "content of {}", path);
        assert_eq!(&fs.read_file(path).unwrap(), want, "re-read of {}", path);

        // Interleaved reads on two handles must not disturb each other.
        let mut first = fs.open(path).unwrap().into_file().unwrap();
        let mut second = fs.open(path).unwrap().into_file().unwrap();
        let half = want.len() / 2;
        let mut head = vec![0u8; half];
        first.read_exact(&mut head).unwrap();
        let mut whole = Vec::new();
        second.read_to_end(&mut whole).unwrap();
        let mut tail = Vec::new();
        first.read_to_end(&mut tail).unwrap();
        head.extend(tail);
        assert_eq!(&head, want, "interleaved read of {}", path);
        assert_eq!(&whole, want, "independent read of {}", path);

        let (parent, name) = parent_and_name(path);
        let listing = fs.read_dir(parent).unwrap();
        let entry = listing
            .iter()
            .find(|e| e.name == name)
            .unwrap_or_else(|| panic!("{} missing from listing of {}", name, parent));
        assert_eq!(entry.kind, FileKind::File);
        assert_eq!(entry.size, want.len() as u64);

        assert!(all.contains(path), "{} missing from walk", path);
    }

    for path in &all {
        let meta = fs.stat(path).unwrap();
        match fs.open(path).unwrap() {
            Handle::Dir(dir) => {
                assert!(meta.is_dir());
                let names: Vec<String> = dir.map(|e| e.name).collect();
                let mut sorted = names.clone();
                sorted.sort();
                assert_eq!(names, sorted, "listing of {} is not sorted", path);
                assert_eq!(names.len(), fs.read_dir(path).unwrap().len());
            }
            Handle::File(file) => {
                assert!(meta.is_file());
                assert_eq!(file.len(), meta.size);
                assert!(matches!(fs.read_dir(path), Err(Error::NotADirectory(_))));
            }
        }
    }

    assert!(matches!(
        fs.open("does/not/exist"),
        Err(Error::NotExist(_))
    ));
    assert!(matches!(fs.stat("/README.md"), Err(Error::InvalidPath(_))));
}
