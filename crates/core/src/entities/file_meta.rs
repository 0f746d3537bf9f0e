use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// One indexed file as it travels inside INDEX messages. Identity is the
/// `hash`: two metas with the same hash describe the same content no matter
/// the path.
pub struct FileMeta {
    /// Path relative to the synchronized folder, `/`-joined.
    pub relative_path: String,
    pub size: u64,
    /// Modification time, unix seconds.
    pub mtime: i64,
    /// Lowercase hex SHA-256 of the file bytes.
    pub hash: String,
}
