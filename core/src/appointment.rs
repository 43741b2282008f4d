//! Appointment entity and its lifecycle payloads.
//!
//! Appointments are ephemeral value objects: each producer operation builds one,
//! validates it and serializes it straight into an envelope. Nothing here keeps
//! state between calls; the broker log is the record.
//!
//! Three payload shapes travel on the wire:
//!
//! - [`Appointment`]: the full record, published on creation
//! - [`AppointmentUpdate`]: a partial field set keyed by `id`
//! - [`Cancellation`]: the cancellation marker with an optional reason
//!
//! All three use camelCase JSON field names.

use crate::environment::{Clock, iso8601};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Rendering used for a cancellation without a reason.
pub const REASON_NOT_SPECIFIED: &str = "Not specified";

/// Lifecycle status of an appointment.
///
/// Values outside the known set are carried through as [`Other`](Self::Other)
/// so a consumer never drops a record over a status it does not recognise.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AppointmentStatus {
    /// Booked but not yet confirmed (the default on creation)
    #[default]
    Scheduled,
    /// Confirmed by the practice
    Confirmed,
    /// Cancelled by either party
    Cancelled,
    /// The visit took place
    Completed,
    /// Any other status string, kept verbatim
    Other(String),
}

impl AppointmentStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
            Self::Other(status) => status,
        }
    }
}

impl From<String> for AppointmentStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "SCHEDULED" => Self::Scheduled,
            "CONFIRMED" => Self::Confirmed,
            "CANCELLED" => Self::Cancelled,
            "COMPLETED" => Self::Completed,
            _ => Self::Other(status),
        }
    }
}

impl From<AppointmentStatus> for String {
    fn from(status: AppointmentStatus) -> Self {
        match status {
            AppointmentStatus::Other(status) => status,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads an explicit `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Input for [`Appointment::construct`].
///
/// Every field is optional; absent values are defaulted (id, status,
/// timestamps) or left empty and reported by [`Appointment::validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    /// Caller-supplied identifier; a v4 UUID is generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Patient name (required)
    #[serde(default)]
    pub patient_name: Option<String>,
    /// Doctor name (required)
    #[serde(default)]
    pub doctor_name: Option<String>,
    /// Date as free text (required, not parsed)
    #[serde(default)]
    pub appointment_date: Option<String>,
    /// Time as free text (required, not parsed)
    #[serde(default)]
    pub appointment_time: Option<String>,
    /// Reason for the visit
    #[serde(default)]
    pub reason: Option<String>,
    /// Initial status; `SCHEDULED` when absent
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    /// Creation timestamp; the clock's now when absent
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last update timestamp; the clock's now when absent
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Result of [`Appointment::validate`].
///
/// Every required field is checked independently, so the report lists all
/// missing fields at once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Error messages in field order
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// `true` when no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors joined the way they are reported to callers.
    #[must_use]
    pub fn joined(&self) -> String {
        self.errors.join(", ")
    }
}

/// The appointment record published on creation.
///
/// Decoding is lenient: missing or `null` fields fall back to empty values so
/// an incomplete record still reaches the handlers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(default, deserialize_with = "null_as_default")]
    id: String,
    /// Patient name
    #[serde(default, deserialize_with = "null_as_default")]
    pub patient_name: String,
    /// Doctor name
    #[serde(default, deserialize_with = "null_as_default")]
    pub doctor_name: String,
    /// Date as free text
    #[serde(default, deserialize_with = "null_as_default")]
    pub appointment_date: String,
    /// Time as free text
    #[serde(default, deserialize_with = "null_as_default")]
    pub appointment_time: String,
    /// Reason for the visit
    #[serde(default)]
    pub reason: Option<String>,
    /// Current status
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: AppointmentStatus,
    /// ISO-8601 creation timestamp
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    /// ISO-8601 last update timestamp
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
}

impl Appointment {
    /// Build an appointment from caller data, filling in defaults.
    ///
    /// Has no side effects beyond reading the clock. Does not validate.
    #[must_use]
    pub fn construct(data: NewAppointment, clock: &dyn Clock) -> Self {
        let now = iso8601(clock.now());
        Self {
            id: data
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            patient_name: data.patient_name.unwrap_or_default(),
            doctor_name: data.doctor_name.unwrap_or_default(),
            appointment_date: data.appointment_date.unwrap_or_default(),
            appointment_time: data.appointment_time.unwrap_or_default(),
            reason: data.reason,
            status: data.status.unwrap_or_default(),
            created_at: data
                .created_at
                .filter(|at| !at.is_empty())
                .unwrap_or_else(|| now.clone()),
            updated_at: data.updated_at.filter(|at| !at.is_empty()).unwrap_or(now),
        }
    }

    /// The appointment identifier. Fixed once constructed.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check the required fields.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let required = [
            (&self.patient_name, "Patient name is required"),
            (&self.doctor_name, "Doctor name is required"),
            (&self.appointment_date, "Appointment date is required"),
            (&self.appointment_time, "Appointment time is required"),
        ];

        ValidationReport {
            errors: required
                .into_iter()
                .filter(|(value, _)| value.is_empty())
                .map(|(_, message)| message.to_string())
                .collect(),
        }
    }

    /// Canonical field mapping used as the envelope payload.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization itself fails.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Typed set of fields for a partial update.
///
/// Only the fields that are `Some` end up in the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentChanges {
    /// New patient name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    /// New doctor name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    /// New date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_date: Option<String>,
    /// New time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_time: Option<String>,
    /// New reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// New status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
}

/// Partial update payload keyed by appointment id.
///
/// Carries `id` and `updatedAt` plus whatever fields the caller changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentUpdate {
    /// Appointment the update applies to
    pub id: String,
    /// ISO-8601 time the update was issued
    #[serde(default)]
    pub updated_at: String,
    /// Changed fields, flattened into the payload object
    #[serde(flatten)]
    pub changes: Map<String, Value>,
}

impl AppointmentUpdate {
    /// Merge caller changes with `{id, updatedAt}`.
    ///
    /// The merged `id` and `updatedAt` always win over same-named keys in
    /// `changes`.
    #[must_use]
    pub fn merge(id: impl Into<String>, mut changes: Map<String, Value>, clock: &dyn Clock) -> Self {
        changes.remove("id");
        changes.remove("updatedAt");
        Self {
            id: id.into(),
            updated_at: iso8601(clock.now()),
            changes,
        }
    }
}

const fn cancelled_status() -> AppointmentStatus {
    AppointmentStatus::Cancelled
}

/// Cancellation payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    /// Appointment being cancelled
    pub id: String,
    /// Always `CANCELLED`
    #[serde(default = "cancelled_status")]
    pub status: AppointmentStatus,
    /// Why it was cancelled; `null` when not given
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    /// ISO-8601 cancellation time
    #[serde(default)]
    pub cancelled_at: String,
}

impl Cancellation {
    /// Build a cancellation stamped with the clock's now.
    #[must_use]
    pub fn new(id: impl Into<String>, reason: Option<String>, clock: &dyn Clock) -> Self {
        Self {
            id: id.into(),
            status: AppointmentStatus::Cancelled,
            cancellation_reason: reason,
            cancelled_at: iso8601(clock.now()),
        }
    }

    /// The reason, or `"Not specified"` when absent or empty.
    #[must_use]
    pub fn reason_or_default(&self) -> &str {
        self.cancellation_reason
            .as_deref()
            .filter(|reason| !reason.is_empty())
            .unwrap_or(REASON_NOT_SPECIFIED)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    struct StoppedClock;

    impl Clock for StoppedClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        }
    }

    fn complete() -> NewAppointment {
        NewAppointment {
            patient_name: Some("A".to_string()),
            doctor_name: Some("B".to_string()),
            appointment_date: Some("2025-01-01".to_string()),
            appointment_time: Some("09:00".to_string()),
            ..NewAppointment::default()
        }
    }

    #[test]
    fn construct_fills_defaults() {
        let appointment = Appointment::construct(complete(), &StoppedClock);

        assert!(uuid::Uuid::parse_str(appointment.id()).is_ok());
        assert_eq!(appointment.status, AppointmentStatus::Scheduled);
        assert_eq!(appointment.created_at, "2025-01-01T00:00:00.000Z");
        assert_eq!(appointment.updated_at, "2025-01-01T00:00:00.000Z");
        assert_eq!(appointment.reason, None);
    }

    #[test]
    fn construct_keeps_supplied_values() {
        let data = NewAppointment {
            id: Some("appt-1".to_string()),
            status: Some(AppointmentStatus::Confirmed),
            created_at: Some("2024-12-31T10:00:00.000Z".to_string()),
            ..complete()
        };

        let appointment = Appointment::construct(data, &StoppedClock);

        assert_eq!(appointment.id(), "appt-1");
        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
        assert_eq!(appointment.created_at, "2024-12-31T10:00:00.000Z");
        assert_eq!(appointment.updated_at, "2025-01-01T00:00:00.000Z");
    }

    #[test]
    fn empty_id_is_replaced() {
        let data = NewAppointment {
            id: Some(String::new()),
            ..complete()
        };
        let appointment = Appointment::construct(data, &StoppedClock);
        assert!(!appointment.id().is_empty());
    }

    #[test]
    fn empty_timestamps_fall_back_to_now() {
        let data = NewAppointment {
            created_at: Some(String::new()),
            updated_at: Some(String::new()),
            ..complete()
        };
        let appointment = Appointment::construct(data, &StoppedClock);
        assert_eq!(appointment.created_at, "2025-01-01T00:00:00.000Z");
        assert_eq!(appointment.updated_at, "2025-01-01T00:00:00.000Z");
    }

    #[test]
    fn incomplete_record_decodes_with_empty_fields() {
        let decoded: Appointment =
            serde_json::from_str(r#"{"patientName":null,"doctorName":"B","reason":null}"#).unwrap();

        assert_eq!(decoded.id(), "");
        assert_eq!(decoded.patient_name, "");
        assert_eq!(decoded.doctor_name, "B");
        assert_eq!(decoded.reason, None);
        assert_eq!(decoded.status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn unrecognised_status_is_kept_verbatim() {
        let decoded: Appointment =
            serde_json::from_str(r#"{"id":"a","status":"RESCHEDULED"}"#).unwrap();
        assert_eq!(
            decoded.status,
            AppointmentStatus::Other("RESCHEDULED".to_string())
        );
        assert_eq!(decoded.to_json().unwrap()["status"], "RESCHEDULED");

        let known: AppointmentStatus = serde_json::from_str(r#""COMPLETED""#).unwrap();
        assert_eq!(known, AppointmentStatus::Completed);
    }

    #[test]
    fn validate_reports_every_missing_field_in_order() {
        let appointment = Appointment::construct(NewAppointment::default(), &StoppedClock);
        let report = appointment.validate();

        assert!(!report.is_valid());
        assert_eq!(
            report.errors,
            vec![
                "Patient name is required",
                "Doctor name is required",
                "Appointment date is required",
                "Appointment time is required",
            ]
        );
        assert_eq!(
            report.joined(),
            "Patient name is required, Doctor name is required, \
             Appointment date is required, Appointment time is required"
        );
    }

    #[test]
    fn serialized_fields_use_wire_names() {
        let appointment = Appointment::construct(complete(), &StoppedClock);
        let json = appointment.to_json().unwrap();
        let object = json.as_object().unwrap();

        let mut keys: Vec<_> = object.keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "appointmentDate",
                "appointmentTime",
                "createdAt",
                "doctorName",
                "id",
                "patientName",
                "reason",
                "status",
                "updatedAt",
            ]
        );
        assert_eq!(object["status"], "SCHEDULED");
    }

    #[test]
    fn serialize_then_deserialize_keeps_all_fields() {
        let data = NewAppointment {
            reason: Some("Checkup".to_string()),
            status: Some(AppointmentStatus::Completed),
            ..complete()
        };
        let appointment = Appointment::construct(data, &StoppedClock);

        let bytes = serde_json::to_vec(&appointment).unwrap();
        let decoded: Appointment = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded, appointment);
    }

    #[test]
    fn update_merge_overrides_id_and_timestamp() {
        let mut changes = Map::new();
        changes.insert("id".to_string(), Value::from("other"));
        changes.insert("updatedAt".to_string(), Value::from("yesterday"));
        changes.insert("status".to_string(), Value::from("CONFIRMED"));

        let update = AppointmentUpdate::merge("appt-1", changes, &StoppedClock);
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json["id"], "appt-1");
        assert_eq!(json["updatedAt"], "2025-01-01T00:00:00.000Z");
        assert_eq!(json["status"], "CONFIRMED");
    }

    #[test]
    fn cancellation_without_reason() {
        let cancellation = Cancellation::new("id-1", None, &StoppedClock);
        let json = serde_json::to_value(&cancellation).unwrap();

        assert_eq!(json["status"], "CANCELLED");
        assert!(json["cancellationReason"].is_null());
        assert_eq!(cancellation.reason_or_default(), "Not specified");
    }

    #[test]
    fn cancellation_decodes_without_optional_fields() {
        let cancellation: Cancellation = serde_json::from_str(r#"{"id":"id-9"}"#).unwrap();
        assert_eq!(cancellation.status, AppointmentStatus::Cancelled);
        assert_eq!(cancellation.reason_or_default(), "Not specified");
    }

    fn field(present: bool, value: &str) -> Option<String> {
        present.then(|| value.to_string())
    }

    proptest! {
        #[test]
        fn error_count_matches_missing_fields(
            patient in any::<bool>(),
            doctor in any::<bool>(),
            date in any::<bool>(),
            time in any::<bool>(),
        ) {
            let data = NewAppointment {
                patient_name: field(patient, "A"),
                doctor_name: field(doctor, "B"),
                appointment_date: field(date, "2025-01-01"),
                appointment_time: field(time, "09:00"),
                ..NewAppointment::default()
            };
            let missing = [patient, doctor, date, time].iter().filter(|p| !**p).count();

            let report = Appointment::construct(data, &StoppedClock).validate();

            prop_assert_eq!(report.errors.len(), missing);
            prop_assert_eq!(report.is_valid(), missing == 0);
        }

        #[test]
        fn non_empty_required_fields_are_valid(
            patient in "[a-zA-Z ]{1,20}",
            doctor in "[a-zA-Z. ]{1,20}",
            date in "[0-9-]{1,10}",
            time in "[0-9: APM]{1,8}",
        ) {
            let data = NewAppointment {
                patient_name: Some(patient),
                doctor_name: Some(doctor),
                appointment_date: Some(date),
                appointment_time: Some(time),
                ..NewAppointment::default()
            };

            let report = Appointment::construct(data, &StoppedClock).validate();

            prop_assert!(report.is_valid());
            prop_assert!(report.errors.is_empty());
        }
    }
}
