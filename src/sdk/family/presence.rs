use crate::sdk::config::SessionContext;
use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::family::models::Location;
use crate::sdk::geo::GeoPoint;
use crate::sdk::serialization::now_millis;
use crate::sdk::store::{paths, RemoteStore};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// 当前用户的位置与电量上报
pub struct PresenceReporter {
    store: Arc<dyn RemoteStore>,
    session: Arc<SessionContext>,
}

impl PresenceReporter {
    pub fn new(store: Arc<dyn RemoteStore>, session: Arc<SessionContext>) -> Self {
        Self { store, session }
    }

    /// 上报位置，返回写入的记录
    pub async fn report_location(&self, point: GeoPoint) -> SdkResult<Location> {
        if !point.latitude.is_finite() || !point.longitude.is_finite() {
            return Err(SdkError::InvalidArgument(format!(
                "non-finite coordinate {:?}",
                point
            )));
        }
        let location = Location {
            latitude: point.latitude,
            longitude: point.longitude,
            updated_at: now_millis(),
        };
        self.store
            .set(&paths::user_location(&self.session.user_id), json!(location))
            .await?;
        debug!(
            "[Presence] {} 上报位置 ({}, {})",
            self.session.user_id, location.latitude, location.longitude
        );
        Ok(location)
    }

    /// 上报电量百分比
    pub async fn report_battery(&self, level: u8) -> SdkResult<()> {
        if level > 100 {
            return Err(SdkError::InvalidArgument(format!(
                "battery level {} out of range",
                level
            )));
        }
        self.store
            .set(
                &paths::user(&self.session.user_id).child("batteryLevel"),
                json!(level),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::store::{subscribe_value, MemoryStore};
    use crate::sdk::testing::{init_test_logger, next_item};

    fn reporter() -> (Arc<MemoryStore>, PresenceReporter) {
        init_test_logger();
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(SessionContext::new("u1", "token"));
        (store.clone(), PresenceReporter::new(store, session))
    }

    #[tokio::test]
    async fn location_reports_reach_subscribers() {
        let (store, reporter) = reporter();
        let mut stream = subscribe_value::<Location>(store.clone(), paths::user_location("u1"));
        assert_eq!(next_item(&mut stream).await.unwrap(), None);

        let written = reporter
            .report_location(GeoPoint::new(31.23, 121.47))
            .await
            .unwrap();
        assert!(written.updated_at > 0);
        assert_eq!(next_item(&mut stream).await.unwrap(), Some(written));
    }

    #[tokio::test]
    async fn invalid_reports_are_rejected() {
        let (store, reporter) = reporter();
        assert!(matches!(
            reporter.report_battery(101).await,
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(reporter
            .report_location(GeoPoint::new(f64::NAN, 1.0))
            .await
            .is_err());

        reporter.report_battery(42).await.unwrap();
        let snap = store.get(&paths::user("u1")).await.unwrap();
        assert_eq!(snap.value(), Some(&json!({"batteryLevel": 42})));
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let (store, reporter) = reporter();
        store.set_write_failure(Some("offline"));
        assert!(matches!(
            reporter.report_battery(10).await,
            Err(SdkError::Network(_))
        ));
    }
}
