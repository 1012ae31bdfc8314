//! Per-target field declarations
//!
//! A `TargetSpec` says which CSV column feeds which target field, how the
//! value is typed, whether it may be absent, how dates are rendered and
//! which fields an update is allowed to touch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::enrollment::columns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Join key: lowercased and trimmed
    Email,
    Text,
    /// Digits only, last 10 kept
    Phone,
    Number,
    Date,
}

/// What to do when the source column is missing from the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldPresence {
    /// Always produced (email, phone)
    Required,
    /// Produced only when the column exists (or parses, for numbers/dates)
    OmitIfAbsent,
    /// Missing column becomes an empty string
    IncludeEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateEncoding {
    /// `"2024-01-15T00:00:00Z"`
    IsoString,
    /// `{"__type":"Date","iso":"2024-01-15T00:00:00.000Z"}`
    ParseDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// Update only when the payload's freshness timestamp is strictly newer
    ChangeGated { freshness_field: String },
    /// Update whenever the allow-listed subset carries any non-empty value
    AlwaysUpdateIfNonEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub target: String,
    pub source: String,
    pub kind: FieldKind,
    pub presence: FieldPresence,
}

impl FieldSpec {
    pub fn new(
        target: impl Into<String>,
        source: impl Into<String>,
        kind: FieldKind,
        presence: FieldPresence,
    ) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            kind,
            presence,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("target '{0}' declares no fields")]
    NoFields(String),

    #[error("target '{target}': identity field '{field}' is not declared as an email field")]
    IdentityNotDeclared { target: String, field: String },

    #[error("target '{target}': update allow-list names undeclared field '{field}'")]
    UnknownAllowListField { target: String, field: String },

    #[error("target '{target}': identity field '{field}' must not be updatable")]
    IdentityInAllowList { target: String, field: String },

    #[error("target '{target}': freshness field '{field}' must be a declared date field")]
    BadFreshnessField { target: String, field: String },

    #[error("target '{0}' declares no record id field")]
    NoRecordIdField(String),

    #[error("target '{target}': field '{field}' of kind {kind:?} cannot use presence {presence:?}")]
    UnsupportedPresence {
        target: String,
        field: String,
        kind: FieldKind,
        presence: FieldPresence,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Short name used in logs and as the report key
    pub name: String,
    pub identity_field: String,
    /// Candidate id fields on existing records, first non-empty wins
    pub record_id_fields: Vec<String>,
    pub date_encoding: DateEncoding,
    pub fields: Vec<FieldSpec>,
    pub update_allow_list: Vec<String>,
    pub update_policy: UpdatePolicy,
}

impl TargetSpec {
    pub fn field(&self, target: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.target == target)
    }

    /// Source column feeding the identity field, if it is an email field.
    pub fn identity_source(&self) -> Option<&str> {
        self.field(&self.identity_field)
            .filter(|f| f.kind == FieldKind::Email)
            .map(|f| f.source.as_str())
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.fields.is_empty() {
            return Err(SpecError::NoFields(self.name.clone()));
        }

        match self.field(&self.identity_field) {
            Some(f) if f.kind == FieldKind::Email => {}
            _ => {
                return Err(SpecError::IdentityNotDeclared {
                    target: self.name.clone(),
                    field: self.identity_field.clone(),
                });
            }
        }

        if self.record_id_fields.iter().all(String::is_empty) {
            return Err(SpecError::NoRecordIdField(self.name.clone()));
        }

        for f in &self.fields {
            let ok = match f.kind {
                FieldKind::Number | FieldKind::Date => f.presence == FieldPresence::OmitIfAbsent,
                FieldKind::Email | FieldKind::Phone => f.presence == FieldPresence::Required,
                FieldKind::Text => f.presence != FieldPresence::Required,
            };
            if !ok {
                return Err(SpecError::UnsupportedPresence {
                    target: self.name.clone(),
                    field: f.target.clone(),
                    kind: f.kind,
                    presence: f.presence,
                });
            }
        }

        for name in &self.update_allow_list {
            if *name == self.identity_field {
                return Err(SpecError::IdentityInAllowList {
                    target: self.name.clone(),
                    field: name.clone(),
                });
            }
            if self.field(name).is_none() {
                return Err(SpecError::UnknownAllowListField {
                    target: self.name.clone(),
                    field: name.clone(),
                });
            }
        }

        if let UpdatePolicy::ChangeGated { freshness_field } = &self.update_policy {
            if !matches!(self.field(freshness_field), Some(f) if f.kind == FieldKind::Date) {
                return Err(SpecError::BadFreshnessField {
                    target: self.name.clone(),
                    field: freshness_field.clone(),
                });
            }
        }

        Ok(())
    }

    /// Bubble Data API target: ISO string dates, text omitted when the
    /// column is missing, updates gated on last-login freshness.
    pub fn bubble() -> Self {
        use FieldKind::{Date, Email, Number, Phone, Text};
        use FieldPresence::{OmitIfAbsent, Required};

        let fields = vec![
            FieldSpec::new("pre_licensing_email", columns::EMAIL, Email, Required),
            FieldSpec::new("first_name", columns::FIRST_NAME, Text, OmitIfAbsent),
            FieldSpec::new("last_name", columns::LAST_NAME, Text, OmitIfAbsent),
            FieldSpec::new("phone", columns::PHONE, Phone, Required),
            FieldSpec::new("imo", columns::DEPARTMENT, Text, OmitIfAbsent),
            FieldSpec::new("date_enrolled", columns::DATE_ENROLLED, Date, OmitIfAbsent),
            FieldSpec::new(
                "pre_licensing_course_last_login",
                columns::LAST_LOGGED_IN,
                Date,
                OmitIfAbsent,
            ),
            FieldSpec::new("time_spent_in_course", columns::TIME_SPENT, Text, OmitIfAbsent),
            FieldSpec::new("percentage_ple_complete", columns::PLE_COMPLETE, Number, OmitIfAbsent),
            FieldSpec::new("percentage_prep_complete", columns::PREP_COMPLETE, Number, OmitIfAbsent),
            FieldSpec::new("percentage_sim_complete", columns::SIM_COMPLETE, Number, OmitIfAbsent),
            FieldSpec::new("ple_date_completed", columns::PLE_DATE_COMPLETED, Date, OmitIfAbsent),
            FieldSpec::new("pre_licensing_course", columns::COURSE, Text, OmitIfAbsent),
            FieldSpec::new("hiring_manager", columns::HIRING_MANAGER, Text, OmitIfAbsent),
            FieldSpec::new("prepared_to_pass", columns::PREPARED_TO_PASS, Text, OmitIfAbsent),
        ];

        Self {
            name: "bubble".to_string(),
            identity_field: "pre_licensing_email".to_string(),
            record_id_fields: vec!["_id".to_string(), "id".to_string()],
            date_encoding: DateEncoding::IsoString,
            fields,
            update_allow_list: to_strings(&[
                "pre_licensing_course_last_login",
                "time_spent_in_course",
                "percentage_ple_complete",
                "ple_date_completed",
                "pre_licensing_course",
                "hiring_manager",
                "percentage_prep_complete",
                "percentage_sim_complete",
                "prepared_to_pass",
                "date_enrolled",
            ]),
            update_policy: UpdatePolicy::ChangeGated {
                freshness_field: "pre_licensing_course_last_login".to_string(),
            },
        }
    }

    /// Back4App (Parse Server) target: tagged date objects, text always
    /// present, updates whenever there is something non-empty to send.
    pub fn back4app() -> Self {
        use FieldKind::{Date, Email, Number, Phone, Text};
        use FieldPresence::{IncludeEmpty, OmitIfAbsent, Required};

        let fields = vec![
            FieldSpec::new("pre_licensing_email_text", columns::EMAIL, Email, Required),
            FieldSpec::new("first_name_text", columns::FIRST_NAME, Text, IncludeEmpty),
            FieldSpec::new("last_name_text", columns::LAST_NAME, Text, IncludeEmpty),
            FieldSpec::new("phone_text", columns::PHONE, Phone, Required),
            FieldSpec::new("imo_text", columns::DEPARTMENT, Text, IncludeEmpty),
            FieldSpec::new("hiring_manager_text", columns::HIRING_MANAGER, Text, IncludeEmpty),
            FieldSpec::new("pre_licensing_course_text", columns::COURSE, Text, IncludeEmpty),
            FieldSpec::new("prepared_to_pass_text", columns::PREPARED_TO_PASS, Text, IncludeEmpty),
            FieldSpec::new("time_spent_text", columns::TIME_SPENT, Text, IncludeEmpty),
            FieldSpec::new("date_enrolled_date", columns::DATE_ENROLLED, Date, OmitIfAbsent),
            FieldSpec::new(
                "pre_licensing_course_last_login_date",
                columns::LAST_LOGGED_IN,
                Date,
                OmitIfAbsent,
            ),
            FieldSpec::new(
                "ple_date_completed_date",
                columns::PLE_DATE_COMPLETED,
                Date,
                OmitIfAbsent,
            ),
            FieldSpec::new("ple_complete_number", columns::PLE_COMPLETE, Number, OmitIfAbsent),
            FieldSpec::new(
                "percentage_prep_complete_number",
                columns::PREP_COMPLETE,
                Number,
                OmitIfAbsent,
            ),
            FieldSpec::new(
                "percentage_sim_complete_number",
                columns::SIM_COMPLETE,
                Number,
                OmitIfAbsent,
            ),
        ];

        Self {
            name: "back4app".to_string(),
            identity_field: "pre_licensing_email_text".to_string(),
            record_id_fields: vec!["objectId".to_string()],
            date_encoding: DateEncoding::ParseDate,
            fields,
            update_allow_list: to_strings(&[
                "pre_licensing_course_last_login_date",
                "time_spent_text",
                "ple_complete_number",
                "ple_date_completed_date",
                "pre_licensing_course_text",
                "hiring_manager_text",
                "percentage_prep_complete_number",
                "percentage_sim_complete_number",
                "prepared_to_pass_text",
                "date_enrolled_date",
            ]),
            update_policy: UpdatePolicy::AlwaysUpdateIfNonEmpty,
        }
    }
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert_eq!(TargetSpec::bubble().validate(), Ok(()));
        assert_eq!(TargetSpec::back4app().validate(), Ok(()));
    }

    #[test]
    fn test_identity_source_is_email_column() {
        assert_eq!(TargetSpec::bubble().identity_source(), Some(columns::EMAIL));
        assert_eq!(TargetSpec::back4app().identity_source(), Some(columns::EMAIL));

        let mut spec = TargetSpec::bubble();
        spec.identity_field = "first_name".to_string();
        assert_eq!(spec.identity_source(), None);
    }

    #[test]
    fn test_identity_must_be_declared_as_email() {
        let mut spec = TargetSpec::bubble();
        spec.identity_field = "first_name".to_string();
        assert!(matches!(
            spec.validate(),
            Err(SpecError::IdentityNotDeclared { .. })
        ));

        spec.identity_field = "nope".to_string();
        assert!(matches!(
            spec.validate(),
            Err(SpecError::IdentityNotDeclared { .. })
        ));
    }

    #[test]
    fn test_allow_list_rejects_identity_and_unknown_fields() {
        let mut spec = TargetSpec::back4app();
        spec.update_allow_list.push("pre_licensing_email_text".to_string());
        assert!(matches!(
            spec.validate(),
            Err(SpecError::IdentityInAllowList { .. })
        ));

        let mut spec = TargetSpec::back4app();
        spec.update_allow_list.push("favourite_colour".to_string());
        assert!(matches!(
            spec.validate(),
            Err(SpecError::UnknownAllowListField { .. })
        ));
    }

    #[test]
    fn test_freshness_field_must_be_a_date() {
        let mut spec = TargetSpec::bubble();
        spec.update_policy = UpdatePolicy::ChangeGated {
            freshness_field: "first_name".to_string(),
        };
        assert!(matches!(
            spec.validate(),
            Err(SpecError::BadFreshnessField { .. })
        ));
    }

    #[test]
    fn test_number_fields_cannot_include_empty() {
        let mut spec = TargetSpec::bubble();
        if let Some(f) = spec
            .fields
            .iter_mut()
            .find(|f| f.target == "percentage_ple_complete")
        {
            f.presence = FieldPresence::IncludeEmpty;
        }
        assert!(matches!(
            spec.validate(),
            Err(SpecError::UnsupportedPresence { .. })
        ));
    }

    #[test]
    fn test_empty_spec_rejected() {
        let mut spec = TargetSpec::bubble();
        spec.fields.clear();
        assert_eq!(spec.validate(), Err(SpecError::NoFields("bubble".into())));

        let mut spec = TargetSpec::bubble();
        spec.record_id_fields.clear();
        assert_eq!(
            spec.validate(),
            Err(SpecError::NoRecordIdField("bubble".into()))
        );
    }
}
