use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A file stored in the database, keyed by its content digest.
///
/// The digest is treated as an opaque unique key; nothing here recomputes it.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fsobjects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub digest: String,

    /// OID of the backing large object, `0` until one is allocated.
    pub object_id: i64,

    /// Free text for humans, mostly useful when debugging.
    pub description: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
