//! Raw enrollment rows as read from the CSV feed

/// Column names of the enrollment CSV export.
pub mod columns {
    pub const EMAIL: &str = "EmailAddress";
    pub const FIRST_NAME: &str = "FirstName";
    pub const LAST_NAME: &str = "LastName";
    pub const PHONE: &str = "Phone";
    pub const DEPARTMENT: &str = "Department";
    pub const DATE_ENROLLED: &str = "DateEnrolled";
    pub const LAST_LOGGED_IN: &str = "LastLoggedIn";
    pub const TIME_SPENT: &str = "TimeSpent";
    pub const PLE_COMPLETE: &str = "% PLE Complete";
    pub const PREP_COMPLETE: &str = "% Prep Complete";
    pub const SIM_COMPLETE: &str = "% Sim Complete";
    pub const PLE_DATE_COMPLETED: &str = "PLE DateCompleted";
    pub const COURSE: &str = "Course";
    pub const HIRING_MANAGER: &str = "HiringManager";
    pub const PREPARED_TO_PASS: &str = "Prepared to Pass";
}

/// One CSV data line: column name -> raw value, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputRow {
    fields: Vec<(String, String)>,
}

impl InputRow {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Value of `column`. A repeated header resolves to its last occurrence.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// True when every cell is empty (such rows are dropped before syncing).
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, value)| value.is_empty())
    }

    /// Join key for this row, derived from the email column.
    pub fn normalized_email(&self) -> String {
        normalize_email(self.get(columns::EMAIL).unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
