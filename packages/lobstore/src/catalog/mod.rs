//! The `fsobjects` catalog: digest-keyed records pointing at large objects.

mod record;
mod service;

pub use service::{FsObjectCatalog, FsObjectScan};
