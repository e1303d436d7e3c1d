//! Hierarchical object storage for RDR files.
//!
//! An RDR file is a tree of groups and byte datasets, each carrying attributes, with
//! datasets able to reference other datasets. [MemoryStore] keeps the tree in memory and
//! [DirStore] maps it onto a directory: groups are directories, datasets are files, and
//! attributes live in YAML sidecars.
use std::{
    collections::BTreeMap,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    U64(u64),
    F32(f32),
    StrArray(Vec<String>),
    U64Array(Vec<u64>),
}

impl AttrValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            AttrValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str_array(&self) -> Option<&[String]> {
        match self {
            AttrValue::StrArray(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64_array(&self) -> Option<&[u64]> {
        match self {
            AttrValue::U64Array(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::U64(value)
    }
}

impl From<f32> for AttrValue {
    fn from(value: f32) -> Self {
        AttrValue::F32(value)
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Str(v) => write!(f, "{v}"),
            AttrValue::U64(v) => write!(f, "{v}"),
            AttrValue::F32(v) => write!(f, "{v}"),
            AttrValue::StrArray(v) => write!(f, "{v:?}"),
            AttrValue::U64Array(v) => write!(f, "{v:?}"),
        }
    }
}

/// An open group or dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    path: String,
    /// Declared length for datasets, `None` for groups
    len: Option<usize>,
}

impl Handle {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn is_dataset(&self) -> bool {
        self.len.is_some()
    }
}

/// Reference to an existing object, stored as the bytes of a referencing dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub path: String,
}

impl Reference {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.path.as_bytes()
    }

    /// # Errors
    /// If `data` is not valid UTF-8
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(Reference {
            path: std::str::from_utf8(data)?.to_string(),
        })
    }
}

pub trait ObjectStore: Send {
    /// Create a group. The parent must exist.
    ///
    /// # Errors
    /// If the parent does not exist or the path is already in use.
    fn create_group(&mut self, path: &str) -> Result<Handle>;

    /// Create a dataset that will hold exactly `len` bytes. The parent must exist.
    ///
    /// # Errors
    /// If the parent does not exist or the path is already in use.
    fn create_dataset(&mut self, path: &str, len: usize) -> Result<Handle>;

    /// Write the complete contents of a dataset.
    ///
    /// # Errors
    /// If `handle` is not a dataset or `data` is not the declared length.
    fn write_bytes(&mut self, handle: &Handle, data: &[u8]) -> Result<()>;

    /// # Errors
    /// If the object no longer exists or the backend fails.
    fn write_attribute(&mut self, handle: &Handle, name: &str, value: AttrValue) -> Result<()>;

    /// # Errors
    /// If the object or attribute does not exist.
    fn read_attribute(&self, path: &str, name: &str) -> Result<AttrValue>;

    /// Open an existing object.
    ///
    /// # Errors
    /// If the object does not exist.
    fn open(&self, path: &str) -> Result<Handle>;

    /// # Errors
    /// If the path is not a dataset.
    fn read_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// Names of the children of a group in natural order, e.g., `x_2` before `x_10`.
    ///
    /// # Errors
    /// If the path is not a group.
    fn list(&self, path: &str) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> bool;

    /// # Errors
    /// Backend specific
    fn close(&mut self, handle: Handle) -> Result<()> {
        trace!(path = %handle.path, "closed");
        Ok(())
    }

    /// Flush everything; no further writes.
    ///
    /// # Errors
    /// Backend specific
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reference an existing object.
    ///
    /// # Errors
    /// If `path` does not exist.
    fn create_reference(&self, path: &str) -> Result<Reference> {
        let handle = self.open(path)?;
        Ok(Reference {
            path: handle.path,
        })
    }

    /// Read a reference written to a dataset.
    ///
    /// # Errors
    /// If `path` does not hold a reference.
    fn read_reference(&self, path: &str) -> Result<Reference> {
        Reference::from_bytes(&self.read_bytes(path)?)
    }
}

/// Canonical form of an object path; no leading or trailing separators, root is empty.
fn normalize(path: &str) -> Result<String> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(Error::store(path, "relative path components not allowed"));
    }
    Ok(parts.join("/"))
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(p, _)| p)
}

lazy_static! {
    static ref TRAILING_NUMBER: Regex = Regex::new(r"(\d+)$").expect("valid regex");
}

fn natural_key(name: &str) -> (String, Option<u64>) {
    match TRAILING_NUMBER.captures(name).and_then(|c| c.get(1)) {
        Some(m) => (name[..m.start()].to_string(), m.as_str().parse().ok()),
        None => (name.to_string(), None),
    }
}

pub(crate) fn natural_sort(names: &mut [String]) {
    names.sort_by_cached_key(|n| natural_key(n));
}

#[derive(Debug, Clone)]
enum Node {
    Group {
        attrs: BTreeMap<String, AttrValue>,
    },
    Dataset {
        len: usize,
        data: Vec<u8>,
        attrs: BTreeMap<String, AttrValue>,
    },
}

impl Node {
    fn attrs_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        match self {
            Node::Group { attrs } | Node::Dataset { attrs, .. } => attrs,
        }
    }

    fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        match self {
            Node::Group { attrs } | Node::Dataset { attrs, .. } => attrs,
        }
    }
}

/// Store holding everything in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    nodes: BTreeMap<String, Node>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let mut nodes = BTreeMap::default();
        nodes.insert(
            String::new(),
            Node::Group {
                attrs: BTreeMap::default(),
            },
        );
        MemoryStore { nodes }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn insert(&mut self, path: &str, node: Node) -> Result<String> {
        let path = normalize(path)?;
        if self.nodes.contains_key(&path) {
            return Err(Error::store(&path, "already exists"));
        }
        match self.nodes.get(parent(&path)) {
            Some(Node::Group { .. }) => {}
            _ => return Err(Error::store(&path, "parent group does not exist")),
        }
        self.nodes.insert(path.clone(), node);
        Ok(path)
    }

    fn node(&self, path: &str) -> Result<(&String, &Node)> {
        let path = normalize(path)?;
        self.nodes
            .get_key_value(&path)
            .ok_or_else(|| Error::store(&path, "does not exist"))
    }
}

impl ObjectStore for MemoryStore {
    fn create_group(&mut self, path: &str) -> Result<Handle> {
        let path = self.insert(
            path,
            Node::Group {
                attrs: BTreeMap::default(),
            },
        )?;
        Ok(Handle { path, len: None })
    }

    fn create_dataset(&mut self, path: &str, len: usize) -> Result<Handle> {
        let path = self.insert(
            path,
            Node::Dataset {
                len,
                data: Vec::default(),
                attrs: BTreeMap::default(),
            },
        )?;
        Ok(Handle {
            path,
            len: Some(len),
        })
    }

    fn write_bytes(&mut self, handle: &Handle, bytes: &[u8]) -> Result<()> {
        match self.nodes.get_mut(&handle.path) {
            Some(Node::Dataset { len, data, .. }) => {
                if bytes.len() != *len {
                    return Err(Error::store(
                        &handle.path,
                        format!("wrote {} bytes to dataset of {}", bytes.len(), len),
                    ));
                }
                data.clear();
                data.extend_from_slice(bytes);
                Ok(())
            }
            _ => Err(Error::store(&handle.path, "not a dataset")),
        }
    }

    fn write_attribute(&mut self, handle: &Handle, name: &str, value: AttrValue) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&handle.path)
            .ok_or_else(|| Error::store(&handle.path, "does not exist"))?;
        node.attrs_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn read_attribute(&self, path: &str, name: &str) -> Result<AttrValue> {
        let (path, node) = self.node(path)?;
        node.attrs()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::store(path, format!("no attribute {name}")))
    }

    fn open(&self, path: &str) -> Result<Handle> {
        let (path, node) = self.node(path)?;
        Ok(Handle {
            path: path.clone(),
            len: match node {
                Node::Group { .. } => None,
                Node::Dataset { len, .. } => Some(*len),
            },
        })
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        match self.node(path)? {
            (_, Node::Dataset { data, .. }) => Ok(data.clone()),
            (path, Node::Group { .. }) => Err(Error::store(path, "not a dataset")),
        }
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let (path, node) = self.node(path)?;
        if !matches!(node, Node::Group { .. }) {
            return Err(Error::store(path, "not a group"));
        }
        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| !k.is_empty() && parent(k) == path.as_str())
            .map(|k| k.rsplit('/').next().unwrap_or_default().to_string())
            .collect();
        natural_sort(&mut names);
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }
}

const ATTRS_FILE: &str = ".attrs.yaml";
const ATTRS_SUFFIX: &str = ".attrs.yaml";

/// Store mapped onto a directory tree.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Create a new store rooted at `root`, which must not already exist.
    ///
    /// # Errors
    /// If the directory exists or cannot be created.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() {
            return Err(Error::store(root.display(), "already exists"));
        }
        fs::create_dir_all(&root).map_err(|e| Error::store(root.display(), e))?;
        Ok(DirStore { root })
    }

    /// Open an existing store.
    ///
    /// # Errors
    /// If `root` is not a directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::store(root.display(), "not a directory"));
        }
        Ok(DirStore { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fspath(&self, path: &str) -> Result<(String, PathBuf)> {
        let path = normalize(path)?;
        let fpath = if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&path)
        };
        Ok((path, fpath))
    }

    fn attrs_path(fpath: &Path) -> PathBuf {
        if fpath.is_dir() {
            fpath.join(ATTRS_FILE)
        } else {
            let name = fpath
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            fpath.with_file_name(format!("{name}{ATTRS_SUFFIX}"))
        }
    }

    fn read_attrs(&self, path: &str, fpath: &Path) -> Result<BTreeMap<String, AttrValue>> {
        let apath = Self::attrs_path(fpath);
        if !apath.exists() {
            return Ok(BTreeMap::default());
        }
        let file = fs::File::open(&apath).map_err(|e| Error::store(path, e))?;
        serde_yaml::from_reader(file).map_err(|e| Error::store(path, e))
    }

    fn prepare(&self, path: &str) -> Result<(String, PathBuf)> {
        let (path, fpath) = self.fspath(path)?;
        if path.is_empty() || fpath.exists() {
            return Err(Error::store(&path, "already exists"));
        }
        let (_, parent_path) = self.fspath(parent(&path))?;
        if !parent_path.is_dir() {
            return Err(Error::store(&path, "parent group does not exist"));
        }
        Ok((path, fpath))
    }
}

impl ObjectStore for DirStore {
    fn create_group(&mut self, path: &str) -> Result<Handle> {
        let (path, fpath) = self.prepare(path)?;
        fs::create_dir(&fpath).map_err(|e| Error::store(&path, e))?;
        Ok(Handle { path, len: None })
    }

    fn create_dataset(&mut self, path: &str, len: usize) -> Result<Handle> {
        let (path, fpath) = self.prepare(path)?;
        if path.ends_with(ATTRS_SUFFIX) {
            return Err(Error::store(&path, "reserved name"));
        }
        fs::File::create(&fpath).map_err(|e| Error::store(&path, e))?;
        Ok(Handle {
            path,
            len: Some(len),
        })
    }

    fn write_bytes(&mut self, handle: &Handle, data: &[u8]) -> Result<()> {
        let Some(len) = handle.len else {
            return Err(Error::store(&handle.path, "not a dataset"));
        };
        if data.len() != len {
            return Err(Error::store(
                &handle.path,
                format!("wrote {} bytes to dataset of {}", data.len(), len),
            ));
        }
        let (_, fpath) = self.fspath(&handle.path)?;
        fs::write(&fpath, data).map_err(|e| Error::store(&handle.path, e))
    }

    fn write_attribute(&mut self, handle: &Handle, name: &str, value: AttrValue) -> Result<()> {
        let (path, fpath) = self.fspath(&handle.path)?;
        if !fpath.exists() {
            return Err(Error::store(&path, "does not exist"));
        }
        let mut attrs = self.read_attrs(&path, &fpath)?;
        attrs.insert(name.to_string(), value);
        let file =
            fs::File::create(Self::attrs_path(&fpath)).map_err(|e| Error::store(&path, e))?;
        serde_yaml::to_writer(file, &attrs).map_err(|e| Error::store(&path, e))
    }

    fn read_attribute(&self, path: &str, name: &str) -> Result<AttrValue> {
        let (path, fpath) = self.fspath(path)?;
        if !fpath.exists() {
            return Err(Error::store(&path, "does not exist"));
        }
        self.read_attrs(&path, &fpath)?
            .remove(name)
            .ok_or_else(|| Error::store(&path, format!("no attribute {name}")))
    }

    fn open(&self, path: &str) -> Result<Handle> {
        let (path, fpath) = self.fspath(path)?;
        let meta = fs::metadata(&fpath).map_err(|e| Error::store(&path, e))?;
        let len = if meta.is_dir() {
            None
        } else {
            Some(usize::try_from(meta.len())?)
        };
        Ok(Handle { path, len })
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let (path, fpath) = self.fspath(path)?;
        if !fpath.is_file() {
            return Err(Error::store(&path, "not a dataset"));
        }
        fs::read(&fpath).map_err(|e| Error::store(&path, e))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let (path, fpath) = self.fspath(path)?;
        if !fpath.is_dir() {
            return Err(Error::store(&path, "not a group"));
        }
        let mut names = Vec::default();
        for entry in fs::read_dir(&fpath).map_err(|e| Error::store(&path, e))? {
            let entry = entry.map_err(|e| Error::store(&path, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(ATTRS_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        natural_sort(&mut names);
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        self.fspath(path).is_ok_and(|(_, p)| p.exists())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn exercise(store: &mut dyn ObjectStore) {
        let grp = store.create_group("All_Data").unwrap();
        store
            .write_attribute(&grp, "Name", AttrValue::from("all"))
            .unwrap();
        store.create_group("/All_Data/X_All/").unwrap();
        for idx in [10, 2, 1] {
            let ds = store
                .create_dataset(&format!("All_Data/X_All/Raw_{idx}"), 3)
                .unwrap();
            store.write_bytes(&ds, &[idx, idx, idx]).unwrap();
            store
                .write_attribute(&ds, "Idx", AttrValue::U64(u64::from(idx)))
                .unwrap();
            store.close(ds).unwrap();
        }

        assert_eq!(
            store.list("All_Data/X_All").unwrap(),
            vec!["Raw_1", "Raw_2", "Raw_10"]
        );
        assert_eq!(store.list("/").unwrap(), vec!["All_Data"]);
        assert_eq!(store.read_bytes("All_Data/X_All/Raw_2").unwrap(), vec![2, 2, 2]);
        assert_eq!(
            store.read_attribute("All_Data/X_All/Raw_10", "Idx").unwrap(),
            AttrValue::U64(10)
        );
        assert_eq!(
            store.read_attribute("All_Data", "Name").unwrap().as_str(),
            Some("all")
        );
        assert!(store.read_attribute("All_Data", "Missing").is_err());

        // length must match the declaration
        let ds = store.create_dataset("All_Data/X_All/Short", 4).unwrap();
        assert!(store.write_bytes(&ds, &[1, 2]).is_err());

        // parents must exist and paths are unique
        assert!(store.create_group("Nope/Child").is_err());
        assert!(store.create_dataset("All_Data/Nope/Raw", 1).is_err());
        assert!(store.create_group("All_Data").is_err());

        let reference = store.create_reference("All_Data/X_All/Raw_1").unwrap();
        assert!(store.create_reference("All_Data/X_All").is_ok());
        assert!(store.create_reference("All_Data/X_All/Raw_99").is_err());
        store.create_group("Data_Products").unwrap();
        let ds = store
            .create_dataset("Data_Products/X_Gran_0", reference.as_bytes().len())
            .unwrap();
        store.write_bytes(&ds, reference.as_bytes()).unwrap();
        assert_eq!(
            store.read_reference("Data_Products/X_Gran_0").unwrap(),
            reference
        );

        assert!(store.exists("All_Data/X_All/Raw_1"));
        assert!(!store.exists("All_Data/X_All/Raw_3"));
        assert!(store.open("All_Data").unwrap().path() == "All_Data");
        assert!(store.open("All_Data/X_All/Raw_1").unwrap().is_dataset());
        store.finish().unwrap();
    }

    #[test]
    fn test_memory_store() {
        exercise(&mut MemoryStore::new());
    }

    #[test]
    fn test_dir_store() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("file.rdr");
        let mut store = DirStore::create(&root).unwrap();
        exercise(&mut store);

        // attributes survive reopening
        let store = DirStore::open(&root).unwrap();
        assert_eq!(
            store.read_attribute("All_Data/X_All/Raw_2", "Idx").unwrap(),
            AttrValue::U64(2)
        );
        assert!(DirStore::create(&root).is_err());
    }

    #[test]
    fn test_relative_paths_rejected() {
        let mut store = MemoryStore::new();
        assert!(store.create_group("../x").is_err());
    }

    #[test_case(&["b_10", "b_9", "a"], &["a", "b_9", "b_10"]; "numeric suffix")]
    #[test_case(&["x", "w"], &["w", "x"]; "plain")]
    fn test_natural_sort(input: &[&str], expected: &[&str]) {
        let mut names: Vec<String> = input.iter().map(|s| (*s).to_string()).collect();
        natural_sort(&mut names);
        assert_eq!(names, expected);
    }
}
