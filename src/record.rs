/// One file's marker count, keyed by its path relative to the scanned root.
///
/// The count is signed because records also come back from the count store,
/// where nothing stops a row from holding a negative value. The tree rejects
/// those on insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub path: String,
    pub count: i64,
}

impl Record {
    pub fn new(path: impl Into<String>, count: i64) -> Self {
        Record {
            path: path.into(),
            count,
        }
    }
}
