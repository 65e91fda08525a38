//! SeaORM entity definitions for the snapshot store schema.

pub mod api_cache;
pub mod collection_run;
pub mod deferred_call;
pub mod entity_record;
