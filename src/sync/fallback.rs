//! Fixed dataset served when a read fails on the wire.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use crate::model::{CompletedJob, Earnings, Order, OrderStatus};

/// Source of offline data. Must return the same value on every call.
pub trait FallbackProvider: Send + Sync {
    fn orders(&self) -> Vec<Order>;
    fn earnings(&self) -> Earnings;
}

/// The demo dataset shipped with the app.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineDataset;

fn available(id: &str, pickup: &str, dropoff: &str, eta: u32, g_mean: f64, g_var: f64) -> Order {
    Order {
        id: id.to_string(),
        pickup: pickup.to_string(),
        dropoff: dropoff.to_string(),
        eta,
        g_mean,
        g_var,
        status: OrderStatus::Available,
        worker_id: None,
    }
}

fn at(year: i32, month: u32, day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, min, 0)
        .single()
        .unwrap_or_default()
}

impl FallbackProvider for OfflineDataset {
    fn orders(&self) -> Vec<Order> {
        vec![
            available("1", "123 Main St, Downtown", "456 Oak Ave, Uptown", 15, 0.75, 0.12),
            available("2", "789 Pine St, Midtown", "321 Elm St, Eastside", 25, 0.68, 0.15),
            available("3", "555 Broadway, Westside", "777 Park Ave, Northside", 35, 0.82, 0.08),
        ]
    }

    fn earnings(&self) -> Earnings {
        Earnings {
            total_earnings: dec!(1250.50),
            weekly_earnings: dec!(320.75),
            completed_jobs: vec![
                CompletedJob {
                    id: "1".into(),
                    pickup: "123 Main St".into(),
                    dropoff: "456 Oak Ave".into(),
                    completed_at: at(2024, 1, 15, 10, 30),
                    earnings: dec!(25.50),
                    g_value: 0.75,
                },
                CompletedJob {
                    id: "2".into(),
                    pickup: "789 Pine St".into(),
                    dropoff: "321 Elm St".into(),
                    completed_at: at(2024, 1, 14, 14, 20),
                    earnings: dec!(32.00),
                    g_value: 0.68,
                },
            ],
        }
    }
}
