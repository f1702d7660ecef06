//! Name to node id table for the flat namespace.
//!
//! Ids are handed out on first sight of a name and never reused, so every
//! entry name owns exactly one id for the life of the mount, whatever the
//! inode numbers of the files behind it.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::sync::{Mutex, MutexGuard};

use super::ROOT_ID;

#[derive(Debug)]
struct Inner {
    ids: HashMap<OsString, u64>,
    names: HashMap<u64, OsString>,
    next: u64,
}

#[derive(Debug)]
pub struct NodeTable {
    inner: Mutex<Inner>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ids: HashMap::new(),
                names: HashMap::new(),
                next: ROOT_ID + 1,
            }),
        }
    }
}

impl NodeTable {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Id of `name`, allocating one if the name is new.
    pub fn id_of(&self, name: &OsStr) -> u64 {
        let mut inner = self.lock();
        if let Some(&id) = inner.ids.get(name) {
            return id;
        }
        let id = inner.next;
        inner.next += 1;
        inner.ids.insert(name.to_os_string(), id);
        inner.names.insert(id, name.to_os_string());
        id
    }

    /// Name previously given `id`, if any.
    pub fn name_of(&self, id: u64) -> Option<OsString> {
        self.lock().names.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
