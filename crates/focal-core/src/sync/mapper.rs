//! Row shape mapping between the remote store and the local store
//!
//! Outbound: queue payloads are sanitized against a per-entity allowlist so
//! fields the remote schema does not recognize never reach the RPC, and
//! required booking defaults are backfilled. Inbound: change-feed rows are
//! mapped field-by-field into local rows with sensible defaults.

use crate::error::{Error, Result};
use crate::models::{Booking, StaffUser};
use crate::util::{normalize_text_option, unix_timestamp_ms};
use serde_json::{json, Map, Value};

/// Fields the remote bookings table recognizes
const BOOKING_REMOTE_FIELDS: &[&str] = &[
    "id",
    "title",
    "category",
    "client_name",
    "total_amount",
    "currency",
    "start_at",
    "end_at",
    "last_editor_rank",
    "updated_by_name",
    "created_at",
    "updated_at",
    "is_deleted",
    "is_paid",
];

/// Fields the remote staff_users table recognizes
const USER_REMOTE_FIELDS: &[&str] = &[
    "id",
    "full_name",
    "email",
    "role",
    "created_at",
    "updated_at",
];

/// Default booking category when the payload carries none
const DEFAULT_CATEGORY: &str = "general";
/// Default booking title when the payload carries none
const DEFAULT_TITLE: &str = "Untitled session";
/// Client name fallback for walk-in bookings
const DEFAULT_CLIENT_NAME: &str = "Walk-in";
/// Default currency for amounts
const DEFAULT_CURRENCY: &str = "USD";

/// Boolean flags the remote stores as 0/1 integers
const BOOLEAN_FLAG_FIELDS: &[&str] = &["is_deleted", "is_paid"];

/// Prepare an outbound payload for the remote schema.
///
/// Strips unrecognized fields for known entities and, for bookings,
/// backfills required defaults and normalizes boolean flags to integers.
/// Unknown entities pass through untouched.
pub fn sanitize_for_remote(entity: &str, data: &Value) -> Value {
    match entity {
        "booking" => sanitize_booking(data),
        "user" => strip_unknown_fields(data, USER_REMOTE_FIELDS),
        _ => data.clone(),
    }
}

fn sanitize_booking(data: &Value) -> Value {
    let mut out = strip_unknown_fields(data, BOOKING_REMOTE_FIELDS);
    let Some(map) = out.as_object_mut() else {
        return out;
    };

    if !is_non_empty_string(map.get("category")) {
        map.insert("category".to_string(), json!(DEFAULT_CATEGORY));
    }
    if !is_non_empty_string(map.get("title")) {
        map.insert("title".to_string(), json!(DEFAULT_TITLE));
    }
    if !is_non_empty_string(map.get("client_name")) {
        // Older clients wrote customer_name; fall back before the default
        let fallback = data
            .get("customer_name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_CLIENT_NAME);
        map.insert("client_name".to_string(), json!(fallback));
    }
    if map.get("created_at").and_then(Value::as_i64).is_none() {
        map.insert("created_at".to_string(), json!(unix_timestamp_ms()));
    }
    for flag in BOOLEAN_FLAG_FIELDS {
        if let Some(value) = map.get(*flag) {
            let normalized = i32::from(truthy(value));
            map.insert((*flag).to_string(), json!(normalized));
        }
    }

    out
}

fn strip_unknown_fields(data: &Value, allowed: &[&str]) -> Value {
    let Some(map) = data.as_object() else {
        return data.clone();
    };
    let filtered: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| allowed.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(filtered)
}

fn is_non_empty_string(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

/// Booleans arrive as true/false, 0/1, or "true"/"false" depending on the
/// writing client
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

fn str_or(row: &Value, key: &str, default: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

fn opt_str(row: &Value, key: &str) -> Option<String> {
    normalize_text_option(row.get(key).and_then(Value::as_str).map(ToString::to_string))
}

fn i64_or(row: &Value, key: &str, default: i64) -> i64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.parse().unwrap_or(default),
        _ => default,
    }
}

/// Map a remote bookings row into the local shape.
///
/// The soft-delete marker is either a non-null `deleted_at` or a truthy
/// `is_deleted` flag, depending on which backend wrote the row.
pub fn booking_from_remote(row: &Value) -> Result<Booking> {
    let id = row
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidInput("remote booking row missing id".to_string()))?;

    let is_deleted = row.get("deleted_at").is_some_and(|v| !v.is_null())
        || row.get("is_deleted").is_some_and(truthy);

    Ok(Booking {
        id: id.to_string(),
        title: str_or(row, "title", DEFAULT_TITLE),
        category: str_or(row, "category", DEFAULT_CATEGORY),
        client_name: str_or(row, "client_name", ""),
        total_amount: i64_or(row, "total_amount", 0),
        currency: str_or(row, "currency", DEFAULT_CURRENCY),
        start_at: i64_or(row, "start_at", 0),
        end_at: i64_or(row, "end_at", 0),
        last_editor_rank: opt_str(row, "last_editor_rank"),
        updated_by_name: opt_str(row, "updated_by_name"),
        created_at: i64_or(row, "created_at", unix_timestamp_ms()),
        updated_at: i64_or(row, "updated_at", unix_timestamp_ms()),
        is_deleted,
    })
}

/// Map a remote staff_users row into the local shape
pub fn user_from_remote(row: &Value) -> Result<StaffUser> {
    let id = row
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidInput("remote user row missing id".to_string()))?;

    Ok(StaffUser {
        id: id.to_string(),
        full_name: str_or(row, "full_name", ""),
        email: str_or(row, "email", ""),
        role: str_or(row, "role", ""),
        created_at: i64_or(row, "created_at", unix_timestamp_ms()),
        updated_at: i64_or(row, "updated_at", unix_timestamp_ms()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_strips_unknown_booking_fields() {
        let payload = json!({
            "id": "b1",
            "title": "Portrait",
            "ui_dirty": true,
            "local_draft_token": "abc"
        });
        let out = sanitize_for_remote("booking", &payload);
        assert!(out.get("ui_dirty").is_none());
        assert!(out.get("local_draft_token").is_none());
        assert_eq!(out["id"], "b1");
    }

    #[test]
    fn sanitize_backfills_booking_defaults() {
        let out = sanitize_for_remote("booking", &json!({"id": "b1"}));
        assert_eq!(out["category"], DEFAULT_CATEGORY);
        assert_eq!(out["title"], DEFAULT_TITLE);
        assert_eq!(out["client_name"], DEFAULT_CLIENT_NAME);
        assert!(out["created_at"].as_i64().unwrap() > 0);
    }

    #[test]
    fn sanitize_prefers_customer_name_fallback() {
        let out = sanitize_for_remote(
            "booking",
            &json!({"id": "b1", "customer_name": "Alice"}),
        );
        assert_eq!(out["client_name"], "Alice");
    }

    #[test]
    fn sanitize_normalizes_boolean_flags_to_integers() {
        let out = sanitize_for_remote(
            "booking",
            &json!({"id": "b1", "is_deleted": true, "is_paid": false}),
        );
        assert_eq!(out["is_deleted"], 1);
        assert_eq!(out["is_paid"], 0);
    }

    #[test]
    fn sanitize_passes_unknown_entities_through() {
        let payload = json!({"anything": "goes", "nested": {"deep": 1}});
        assert_eq!(sanitize_for_remote("session_image", &payload), payload);
    }

    #[test]
    fn booking_from_remote_maps_fields_with_defaults() {
        let row = json!({
            "id": "b1",
            "title": "Wedding",
            "total_amount": 5000,
            "updated_by_name": "Grace",
            "last_editor_rank": "MANAGER"
        });
        let booking = booking_from_remote(&row).unwrap();
        assert_eq!(booking.id, "b1");
        assert_eq!(booking.title, "Wedding");
        assert_eq!(booking.category, DEFAULT_CATEGORY);
        assert_eq!(booking.client_name, "");
        assert_eq!(booking.total_amount, 5000);
        assert_eq!(booking.currency, DEFAULT_CURRENCY);
        assert_eq!(booking.updated_by_name.as_deref(), Some("Grace"));
        assert!(!booking.is_deleted);
    }

    #[test]
    fn booking_from_remote_detects_soft_delete_markers() {
        let by_timestamp = json!({"id": "b1", "deleted_at": "2026-08-01T00:00:00Z"});
        assert!(booking_from_remote(&by_timestamp).unwrap().is_deleted);

        let by_flag = json!({"id": "b1", "is_deleted": 1});
        assert!(booking_from_remote(&by_flag).unwrap().is_deleted);

        let null_marker = json!({"id": "b1", "deleted_at": null});
        assert!(!booking_from_remote(&null_marker).unwrap().is_deleted);
    }

    #[test]
    fn booking_from_remote_requires_id() {
        assert!(booking_from_remote(&json!({"title": "No id"})).is_err());
    }

    #[test]
    fn user_from_remote_maps_fields() {
        let row = json!({"id": "u1", "full_name": "Grace", "role": "MANAGER"});
        let user = user_from_remote(&row).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.full_name, "Grace");
        assert_eq!(user.email, "");
        assert_eq!(user.role, "MANAGER");
    }

    #[test]
    fn amounts_accept_string_numbers() {
        let row = json!({"id": "b1", "total_amount": "2500"});
        assert_eq!(booking_from_remote(&row).unwrap().total_amount, 2500);
    }
}
