//! Process-wide, name-keyed bdev registry (spec §3 invariant: "name
//! uniquely identifies a bdev"; spec §9: "singletons behind a
//! single-writer wrapper"). In this crate the "management reactor" is
//! represented by the lock itself rather than a thread assertion — every
//! mutation still goes through one serialization point.

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::{open_handle, AlreadyExists, Bdev, BdevError, Descriptor, NotFound};

type Examiner = Box<dyn Fn(&Arc<Bdev>) + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    bdevs: HashMap<String, Arc<Bdev>>,
    examiners: Vec<Examiner>,
}

static REGISTRY: OnceCell<Mutex<Registry>> = OnceCell::new();

pub fn global() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

impl Registry {
    /// Register a module hook invoked for every newly registered base
    /// bdev, so it may construct vbdevs on top (spec §4.D).
    pub fn add_examiner(&mut self, f: impl Fn(&Arc<Bdev>) + Send + Sync + 'static) {
        self.examiners.push(Box::new(f));
    }

    pub fn register(&mut self, bdev: Bdev) -> Result<Arc<Bdev>, BdevError> {
        if self.bdevs.contains_key(&bdev.name) {
            return AlreadyExists {
                name: bdev.name,
            }
            .fail();
        }
        let name = bdev.name.clone();
        let arc = Arc::new(bdev);
        self.bdevs.insert(name, arc.clone());
        for examiner in &self.examiners {
            examiner(&arc);
        }
        Ok(arc)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Bdev>> {
        self.bdevs.get(name).cloned()
    }

    pub fn open(
        &self,
        name: &str,
        write: bool,
        claimant: &str,
    ) -> Result<Descriptor, BdevError> {
        let bdev = self.lookup(name).ok_or_else(|| {
            NotFound {
                name: name.to_string(),
            }
            .build()
        })?;
        open_handle(bdev, write, claimant, None)
    }

    /// Unregister a bdev and fire every open descriptor's remove callback
    /// (spec §4.D "Hot-remove"). Returns an error if no such bdev exists;
    /// callers stacking vbdevs are expected to unregister children before
    /// their base.
    pub fn unregister(&mut self, name: &str) -> Result<(), BdevError> {
        let bdev = self.bdevs.remove(name).ok_or_else(|| {
            NotFound {
                name: name.to_string(),
            }
            .build()
        })?;
        bdev.fire_remove_callbacks();
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.bdevs.keys().cloned().collect()
    }
}
