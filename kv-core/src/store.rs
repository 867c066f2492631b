//! KV object store: store/read/delete/exist/list over the path mapper
//!, grounded in `kv_store.c`.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::KvError;
use crate::key::{hex_decode, Key, MAX_KEY_LEN};
use crate::path::PathMapper;

/// A key recovered from a directory listing: raw bytes plus length, mirrors
/// the original's `ObjectKey` (`kv_utils.h`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub key: Key,
}

/// Content-addressed on-disk namespace, sharded by `(bus, ns, hex(key))`.
pub struct ObjectStore {
    paths: PathMapper,
}

impl ObjectStore {
    pub fn new(paths: PathMapper) -> Self {
        ObjectStore { paths }
    }

    /// Store (or append to) an object. Returns the number of bytes written.
    pub fn store(
        &self,
        bus: u32,
        ns: u32,
        key: &Key,
        value: &[u8],
        append: bool,
        must_exist: bool,
        must_not_exist: bool,
    ) -> Result<usize, KvError> {
        if must_exist && must_not_exist {
            return Err(KvError::InvalidParameter);
        }

        let path = self
            .paths
            .object_path_create(bus, ns, key)
            .map_err(|source| KvError::FilePath { bus, ns, source })?;

        let exists = path.exists();
        if must_exist && !exists {
            return Err(KvError::FileNotFound);
        }
        if must_not_exist && exists {
            return Err(KvError::FileExists);
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .map_err(KvError::CannotOpen)?;

        let written = file.write(value).map_err(KvError::CannotOpen)?;
        if written != value.len() {
            return Err(KvError::FileWrite {
                written,
                requested: value.len(),
            });
        }
        Ok(written)
    }

    /// Read up to `max_len` bytes starting at `offset`. Returns the bytes
    /// read (written into `buf`, which must be at least `max_len` long) and
    /// the total object size.
    pub fn read(
        &self,
        bus: u32,
        ns: u32,
        key: &Key,
        offset: u64,
        buf: &mut [u8],
        max_len: usize,
    ) -> Result<(usize, u64), KvError> {
        let path = self.paths.object_path(bus, ns, key);
        let mut file = std::fs::File::open(&path).map_err(KvError::CannotOpen)?;

        let total_size = file.metadata().map_err(KvError::CannotOpen)?.len();

        if offset > total_size {
            return Err(KvError::FileOffset {
                offset,
                size: total_size,
            });
        }
        file.seek(SeekFrom::Start(offset))
            .map_err(KvError::CannotOpen)?;

        let to_read = max_len.min(buf.len());
        let mut read_total = 0;
        while read_total < to_read {
            let n = file
                .read(&mut buf[read_total..to_read])
                .map_err(KvError::CannotOpen)?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        Ok((read_total, total_size))
    }

    /// Delete an object. Idempotent up to error code: the first call
    /// succeeds, subsequent calls return [`KvError::FileNotFound`].
    pub fn delete(&self, bus: u32, ns: u32, key: &Key) -> Result<(), KvError> {
        let path = self.paths.object_path(bus, ns, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(KvError::FileNotFound),
            Err(e) => Err(KvError::Remove(e)),
        }
    }

    /// Returns whether an object exists for `key`.
    pub fn exists(&self, bus: u32, ns: u32, key: &Key) -> bool {
        self.paths.object_path(bus, ns, key).exists()
    }

    /// Enumerate keys whose hex form is `>= hex(prefix)`, in ascending
    /// lexicographic order, skipping `offset` and returning up to
    /// `max_return` (0 meaning unlimited).
    pub fn list(
        &self,
        bus: u32,
        ns: u32,
        prefix: &Key,
        offset: usize,
        max_return: usize,
    ) -> Result<Vec<ObjectKey>, KvError> {
        let dir = self.paths.namespace_dir(bus, ns);
        let max_return = if max_return == 0 {
            usize::MAX
        } else {
            max_return
        };
        let prefix_hex = prefix.to_hex();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(source) => return Err(KvError::FilePath { bus, ns, source }),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| KvError::FilePath { bus, ns, source })?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !prefix.is_empty() && name.as_str() < prefix_hex.as_str() {
                continue;
            }
            names.push(name);
        }
        names.sort();

        if names.len() <= offset {
            return Ok(Vec::new());
        }

        let take = (names.len() - offset).min(max_return);
        let mut out = Vec::with_capacity(take);
        for name in &names[offset..offset + take] {
            let raw = hex_decode(name).map_err(|_| KvError::KeyTooLong(name.len() / 2))?;
            if raw.len() > MAX_KEY_LEN {
                return Err(KvError::KeyTooLong(raw.len()));
            }
            out.push(ObjectKey {
                key: Key::new(&raw).map_err(|_| KvError::KeyTooLong(raw.len()))?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathMapper;
    use tempfile::tempdir;

    fn store_at(dir: &std::path::Path) -> ObjectStore {
        ObjectStore::new(PathMapper::new(dir))
    }

    #[test]
    fn store_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = Key::new(b"key").unwrap();
        let value = b"value\nvalue";

        let written = store
            .store(0xFFFFFFFF, 0xFFFFFFFF, &key, value, false, false, true)
            .unwrap();
        assert_eq!(written, value.len());

        let mut buf = [0u8; 12];
        let (n, total) = store
            .read(0xFFFFFFFF, 0xFFFFFFFF, &key, 0, &mut buf, 12)
            .unwrap();
        assert_eq!(n, value.len());
        assert_eq!(total, value.len() as u64);
        assert_eq!(&buf[..n], value);

        let (n, total) = store
            .read(0xFFFFFFFF, 0xFFFFFFFF, &key, 6, &mut buf, 12)
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(total, value.len() as u64);
        assert_eq!(&buf[..n], b"value");
    }

    #[test]
    fn append_concatenates() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = Key::new(&[0xE1, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6]).unwrap();
        let original = [0u8; 12].map(|_| 0xAAu8);
        let appended = [0xBBu8; 3];

        store
            .store(0, 0, &key, &original, false, false, false)
            .unwrap();
        store
            .store(0, 0, &key, &appended, true, false, false)
            .unwrap();

        let mut buf = [0u8; 12];
        let (n, total) = store.read(0, 0, &key, 2, &mut buf, 12).unwrap();
        assert_eq!(total, 15);
        assert_eq!(n, 12);
        assert_eq!(&buf[..10], &original[2..12]);
        assert_eq!(&buf[10..12], &appended[0..2]);
    }

    #[test]
    fn read_past_eof_errors() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = Key::new(b"k").unwrap();
        store.store(0, 0, &key, b"ab", false, false, false).unwrap();

        let mut buf = [0u8; 4];
        let err = store.read(0, 0, &key, 10, &mut buf, 4).unwrap_err();
        assert!(matches!(err, KvError::FileOffset { offset: 10, size: 2 }));
    }

    #[test]
    fn store_conflicting_flags_rejected() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = Key::new(b"k").unwrap();
        let err = store
            .store(0, 0, &key, b"x", false, true, true)
            .unwrap_err();
        assert!(matches!(err, KvError::InvalidParameter));
    }

    #[test]
    fn delete_is_idempotent_up_to_error() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = Key::new(b"k").unwrap();
        store.store(0, 0, &key, b"x", false, false, false).unwrap();

        store.delete(0, 0, &key).unwrap();
        let err = store.delete(0, 0, &key).unwrap_err();
        assert!(matches!(err, KvError::FileNotFound));
    }

    #[test]
    fn list_orders_and_paginates() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        for name in ["Alice", "Bob", "Connor", "David", "Edmond", "Fred", "Gray", "key"] {
            let key = Key::new(name.as_bytes()).unwrap();
            store.store(0, 0, &key, b"x", false, false, false).unwrap();
        }

        let prefix = Key::new(b"David").unwrap();
        let results = store.list(0, 0, &prefix, 0, 10).unwrap();
        let names: Vec<String> = results
            .iter()
            .map(|k| String::from_utf8(k.key.as_bytes().to_vec()).unwrap())
            .collect();
        assert_eq!(names, vec!["David", "Edmond", "Fred", "Gray", "key"]);

        let paged = store.list(0, 0, &prefix, 2, 2).unwrap();
        let names: Vec<String> = paged
            .iter()
            .map(|k| String::from_utf8(k.key.as_bytes().to_vec()).unwrap())
            .collect();
        assert_eq!(names, vec!["Fred", "Gray"]);

        let none = Key::new(b"zzz").unwrap();
        assert!(store.list(0, 0, &none, 0, 10).unwrap().is_empty());
    }
}
