//! 地理距离计算

use serde::{Deserialize, Serialize};

/// 地球平均半径（米）
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// 经纬度坐标
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// 是否为未设置的零值坐标
    pub fn is_unset(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    fn is_usable(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite() && !self.is_unset()
    }
}

/// 两点间的大圆距离（米，向零取整）
///
/// 任一坐标缺失、为零值或非有限数时返回 0，不会报错。
pub fn distance_meters(from: Option<GeoPoint>, to: Option<GeoPoint>) -> i64 {
    match (from, to) {
        (Some(a), Some(b)) if a.is_usable() && b.is_usable() => haversine(a, b) as i64,
        _ => 0,
    }
}

fn haversine(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_METERS * c
}
