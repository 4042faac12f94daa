use serde::ser::{Serialize, SerializeMap, Serializer};

/// Label of bucket 0, values no group claims.
pub const OTHER_LABEL: &str = "Other";
/// Joins per-partition labels into a composite key.
pub const KEY_SEPARATOR: char = '|';

/// One result row: group labels in rank order, reductions in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct DataRow {
    pub groups: Vec<String>,
    pub aggregates: Vec<Option<f64>>,
}

impl DataRow {
    pub fn key(&self) -> String {
        self.groups.join(KEY_SEPARATOR.to_string().as_str())
    }
}

/// `a`, `b`, ... for partitions and `aa`, `bb`, ... for aggregates.
pub fn field_name(index: usize, repeat: usize) -> String {
    let letter = char::from(b'a' + (index % 26) as u8);
    let width = repeat * (index / 26 + 1);
    std::iter::repeat_n(letter, width).collect()
}

impl Serialize for DataRow {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.groups.len() + self.aggregates.len()))?;
        for (index, group) in self.groups.iter().enumerate() {
            map.serialize_entry(&field_name(index, 1), group)?;
        }
        for (index, value) in self.aggregates.iter().enumerate() {
            map.serialize_entry(&field_name(index, 2), value)?;
        }
        map.end()
    }
}
