use serde::{Deserialize, Serialize};

pub type TagId = i64;

/// A registered tag. Rows exist only while at least one announcement
/// references them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}
