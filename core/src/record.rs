use csv::StringRecord;

/// Placeholder the snapshot tables use for an unknown value.
pub const NULL_FIELD: &str = "\\N";

/// One row of the basics table: `id, type, title, _, adult, ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicsRow {
    pub external_id: String,
    pub media_type: String,
    pub adult: bool,
}

impl BasicsRow {
    /// `None` when the row has fewer than five columns.
    pub fn from_record(record: &StringRecord) -> Option<Self> {
        if record.len() < 5 {
            return None;
        }
        Some(Self {
            external_id: record[0].to_string(),
            media_type: record[1].to_string(),
            adult: &record[4] == "1",
        })
    }
}

/// One row of the alias table: `id, _, title, region, ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkaRow {
    pub external_id: String,
    pub title: String,
    /// `None` when the table says the region is unknown.
    pub region: Option<String>,
}

impl AkaRow {
    pub fn from_record(record: &StringRecord) -> Option<Self> {
        if record.len() < 4 {
            return None;
        }
        let region = match &record[3] {
            NULL_FIELD => None,
            r => Some(r.to_string()),
        };
        Some(Self { external_id: record[0].to_string(), title: record[2].to_string(), region })
    }
}
