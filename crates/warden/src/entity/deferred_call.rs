//! DeferredCall entity - calls still pending when a run ended.
//!
//! Reloaded into the retry queue at the start of the next run against the
//! same store.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deferred_call")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub locator: String,

    /// Key of the entity the result belongs to.
    pub entity_key: String,

    /// Which field of the entity the result fills.
    pub field: String,

    pub recorded_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
