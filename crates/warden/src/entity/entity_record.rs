//! EntityRecord entity - accumulated fields for one harvested entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entity_record")]
pub struct Model {
    /// Repository full name, e.g. "acme/a".
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub key: String,

    /// JSON object of field name to value. Always an object.
    #[sea_orm(column_type = "Json")]
    pub fields: Json,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
