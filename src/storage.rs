//! File-system boundary: a streaming fragment reader for uploads/serving, and
//! a sequence-keyed fragment sink for reconstructing a downloaded file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::config::FRAGMENT_SIZE;
use crate::error::Error;

/// Streams a source file as consecutive `FRAGMENT_SIZE` chunks, numbered from 1.
pub struct FragmentReader {
    reader: BufReader<File>,
    next_seq: u32,
    done: bool,
}

impl FragmentReader {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;

        Ok(FragmentReader {
            reader: BufReader::new(file),
            next_seq: 1,
            done: false,
        })
    }

    /// Returns the next `(sequence, payload)` pair, or `None` once the file is
    /// exhausted. An empty file yields `None` on the first call.
    pub fn next_fragment(&mut self) -> Result<Option<(u32, Vec<u8>)>, Error> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; FRAGMENT_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.done = true;
            return Ok(None);
        }

        buf.truncate(filled);
        let seq = self.next_seq;
        self.next_seq += 1;
        if filled < FRAGMENT_SIZE {
            self.done = true;
        }
        Ok(Some((seq, buf)))
    }

    /// Reads every remaining fragment, keyed by sequence number.
    pub fn read_all(&mut self) -> Result<BTreeMap<u32, Vec<u8>>, Error> {
        let mut out = BTreeMap::new();
        while let Some((seq, data)) = self.next_fragment()? {
            out.insert(seq, data);
        }
        Ok(out)
    }
}

/// Assembles a complete set of fragments into a file at `path`, creating
/// parent directories as needed, then writes them in ascending sequence order.
pub fn write_fragments(path: &Path, fragments: &BTreeMap<u32, Vec<u8>>) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(path)?;
    for data in fragments.values() {
        file.write_all(data)?;
    }
    Ok(())
}

/// Resolves a remote-supplied file name against a root directory, creating
/// the root on demand. Only the file-name component of `name` is used, so
/// an absolute path or a path carrying `..` components can't escape `root`.
pub fn resolve_under_root(root: &Path, name: &str) -> Result<PathBuf, Error> {
    if !root.exists() {
        fs::create_dir_all(root)?;
    }
    let leaf = Path::new(name)
        .file_name()
        .ok_or_else(|| Error::FileNotFound(name.to_string()))?;
    Ok(root.join(leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn reads_empty_file_as_no_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        File::create(&path).unwrap();

        let mut reader = FragmentReader::open(&path).unwrap();
        assert!(reader.next_fragment().unwrap().is_none());
    }

    #[test]
    fn reads_single_partial_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        File::create(&path).unwrap().write_all(b"hello").unwrap();

        let mut reader = FragmentReader::open(&path).unwrap();
        let (seq, data) = reader.next_fragment().unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(data, b"hello");
        assert!(reader.next_fragment().unwrap().is_none());
    }

    #[test]
    fn reads_exact_multiple_of_fragment_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.bin");
        let body = vec![7u8; FRAGMENT_SIZE * 2];
        File::create(&path).unwrap().write_all(&body).unwrap();

        let mut reader = FragmentReader::open(&path).unwrap();
        let fragments = reader.read_all().unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[&1].len(), FRAGMENT_SIZE);
        assert_eq!(fragments[&2].len(), FRAGMENT_SIZE);
    }

    #[test]
    fn missing_file_reports_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.bin");
        match FragmentReader::open(&path) {
            Err(Error::FileNotFound(_)) => {}
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn write_fragments_creates_parent_dirs_and_orders_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");

        let mut fragments = BTreeMap::new();
        fragments.insert(2u32, b"B".to_vec());
        fragments.insert(1u32, b"A".to_vec());
        fragments.insert(3u32, b"C".to_vec());

        write_fragments(&path, &fragments).unwrap();

        let written = fs::read(&path).unwrap();
        assert_eq!(written, b"ABC");
    }

    #[test]
    fn resolve_under_root_strips_absolute_and_parent_components() {
        let dir = tempfile::tempdir().unwrap();

        let absolute = resolve_under_root(dir.path(), "/etc/passwd").unwrap();
        assert_eq!(absolute, dir.path().join("passwd"));

        let traversal = resolve_under_root(dir.path(), "../../etc/passwd").unwrap();
        assert_eq!(traversal, dir.path().join("passwd"));

        let plain = resolve_under_root(dir.path(), "report.bin").unwrap();
        assert_eq!(plain, dir.path().join("report.bin"));
    }

    #[test]
    fn resolve_under_root_rejects_bare_parent_component() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_under_root(dir.path(), "..").is_err());
    }
}
