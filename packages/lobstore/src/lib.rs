//! File storage on top of PostgreSQL large objects.
//!
//! Payloads live in large objects and are catalogued by digest in the
//! `fsobjects` table. [`storage::LargeObject`] is a file-like view of one
//! object inside one transaction; [`entity::fsobject::Model`] maps a digest to
//! its object and hands out scoped access through
//! [`with_lobject`](entity::fsobject::Model::with_lobject);
//! [`storage::postgres::PostgresBlobStore`] packages both into a
//! content-addressed [`storage::BlobStore`].

pub mod catalog;
pub mod config;
pub mod database;
pub mod entity;
pub mod storage;

pub use catalog::{FsObjectCatalog, FsObjectScan};
pub use entity::fsobject::Model as FsObject;
pub use storage::{BlobStore, ContentHash, LargeObject, Oid, OpenMode, StorageError};
