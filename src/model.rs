//! Wire types shared by the transport, the synchronizer and the screens.
//!
//! Field names follow the mobile API (`totalEarnings`, `completedAt`,
//! `workerId`) but also accept the snake_case spelling the backend emits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Worker profile returned by login and persisted alongside the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Where an order is in its lifecycle.
///
/// Progresses linearly: Available → Accepted → Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Available,
    Accepted,
    Completed,
}

impl OrderStatus {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        matches!(
            (self, target),
            (Self::Available, Self::Accepted) | (Self::Accepted, Self::Completed)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
        };
        f.pad(s)
    }
}

/// A delivery job as listed by `GET /orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub pickup: String,
    pub dropoff: String,
    /// Estimated minutes to complete.
    pub eta: u32,
    /// Expected G-value. Opaque scoring input.
    #[serde(default)]
    pub g_mean: f64,
    /// G-value variance.
    #[serde(default)]
    pub g_var: f64,
    pub status: OrderStatus,
    #[serde(
        rename = "workerId",
        alias = "worker_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub worker_id: Option<String>,
}

/// Immutable record of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedJob {
    pub id: String,
    pub pickup: String,
    pub dropoff: String,
    #[serde(rename = "completedAt", alias = "completed_at", with = "timestamp")]
    pub completed_at: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub earnings: Decimal,
    pub g_value: f64,
}

/// Server-computed earnings aggregate. Always re-fetched, never summed locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Earnings {
    #[serde(
        rename = "totalEarnings",
        alias = "total_earnings",
        with = "rust_decimal::serde::float"
    )]
    pub total_earnings: Decimal,
    #[serde(
        rename = "weeklyEarnings",
        alias = "weekly_earnings",
        with = "rust_decimal::serde::float"
    )]
    pub weekly_earnings: Decimal,
    #[serde(rename = "completedJobs", alias = "completed_jobs", default)]
    pub completed_jobs: Vec<CompletedJob>,
}

impl Earnings {
    /// Whether the history contains a record for `order_id`.
    pub fn contains_job(&self, order_id: &str) -> bool {
        self.completed_jobs.iter().any(|job| job.id == order_id)
    }
}

/// Envelope wrapping every success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `POST /login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Payload of a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// RFC 3339 timestamps, also accepting the naive ISO form (`2024-01-15T10:30:00.123`)
/// which is read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub(super) fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(ndt.and_utc());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn order_status_transitions_are_linear() {
        assert!(OrderStatus::Available.can_transition_to(OrderStatus::Accepted));
        assert!(OrderStatus::Accepted.can_transition_to(OrderStatus::Completed));
        assert!(!OrderStatus::Available.can_transition_to(OrderStatus::Completed));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Available));
    }

    #[test]
    fn order_accepts_backend_shape() {
        let json = r#"{
            "id": "4", "pickup": "999 University Blvd", "dropoff": "111 Tech Park",
            "eta": 20, "status": "available", "g_mean": 0.7, "g_var": 0.1, "worker_id": null
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.status, OrderStatus::Available);
        assert_eq!(order.worker_id, None);
        assert_eq!(order.eta, 20);
    }

    #[test]
    fn earnings_accepts_both_spellings() {
        let camel = r#"{
            "totalEarnings": 1250.50, "weeklyEarnings": 320.75,
            "completedJobs": [{"id": "1", "pickup": "a", "dropoff": "b",
                "completedAt": "2024-01-15T10:30:00Z", "earnings": 25.50, "g_value": 0.75}]
        }"#;
        let snake = r#"{
            "total_earnings": 1250.5, "weekly_earnings": 320.75,
            "completed_jobs": [{"id": "1", "pickup": "a", "dropoff": "b",
                "completed_at": "2024-01-15T10:30:00", "earnings": 25.5, "g_value": 0.75}]
        }"#;

        let a: Earnings = serde_json::from_str(camel).unwrap();
        let b: Earnings = serde_json::from_str(snake).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.total_earnings, dec!(1250.50));
        assert!(a.contains_job("1"));
        assert!(!a.contains_job("2"));
    }

    #[test]
    fn envelope_message_is_optional() {
        let body: ApiResponse<Vec<Order>> = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(body.data.is_empty());
        assert!(body.message.is_none());
    }

    #[test]
    fn rejects_garbage_timestamp() {
        assert!(timestamp::parse("yesterday").is_none());
        assert!(timestamp::parse("2024-01-14T14:20:00+02:00").is_some());
    }
}
