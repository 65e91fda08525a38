//! ApiCache entity - one cached response per resource locator.
//!
//! The validators (ETag, Last-Modified) drive conditional requests; the body
//! is what a 304 answer resolves to.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_cache")]
pub struct Model {
    /// Canonical request URL, including query parameters.
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub locator: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub etag: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_modified: Option<String>,

    /// Decoded JSON body of the last fresh response.
    #[sea_orm(column_type = "Json")]
    pub body: Json,

    /// HTTP status of the last fresh response.
    pub status: i32,

    pub cached_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
