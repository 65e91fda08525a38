pub(crate) mod harvest;
pub(crate) mod limits;
pub(crate) mod meta;
pub(crate) mod search;
pub(crate) mod shared;
pub(crate) mod status;
