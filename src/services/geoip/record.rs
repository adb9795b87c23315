//! 地理位置记录与 provider 响应归一化

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::ip::ValidIp;

/// provider 原始响应（JSON 对象）
pub type RawProviderResponse = Map<String, Value>;

/// 解析完成的地理位置记录
///
/// 不变量：经纬度要么同时存在且在合法范围内，要么同时缺失。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocationRecord {
    pub ip: String,
    pub country: Option<String>,
    /// ISO 3166-1 alpha-2 国家代码 (e.g., "CN", "US")
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    /// 自治系统，例如 "AS15169 Google LLC"
    #[serde(rename = "as")]
    pub as_number: Option<String>,
    pub raw_response: RawProviderResponse,
    pub resolved_at: DateTime<Utc>,
}

impl GeoLocationRecord {
    /// 从 provider 响应构造记录
    ///
    /// - 缺失字段保持 `None`，不填默认值
    /// - 字符串形式的经纬度会被解析为浮点数
    /// - 原始响应原样保存在 `raw_response`
    ///
    /// ip-api.com 的字段名优先，也兼容其他 API 的常见字段名
    pub fn from_provider(ip: &ValidIp, raw: RawProviderResponse, resolved_at: DateTime<Utc>) -> Self {
        let (latitude, longitude) = coordinates(
            number_field(&raw, &["lat", "latitude"]),
            number_field(&raw, &["lon", "lng", "longitude"]),
        );

        Self {
            ip: ip.as_key(),
            country: text_field(&raw, &["country", "country_name"]),
            country_code: text_field(&raw, &["countryCode", "country_code"]),
            region: text_field(&raw, &["region", "region_code"]),
            region_name: text_field(&raw, &["regionName", "region_name"]),
            city: text_field(&raw, &["city"]),
            zip: text_field(&raw, &["zip", "postal", "postal_code"]),
            latitude,
            longitude,
            timezone: text_field(&raw, &["timezone"]),
            isp: text_field(&raw, &["isp"]),
            org: text_field(&raw, &["org"]),
            as_number: text_field(&raw, &["as", "asn"]),
            raw_response: raw,
            resolved_at,
        }
    }

    /// 国家与城市都非空才算完整
    pub fn is_complete(&self) -> bool {
        non_empty(&self.country) && non_empty(&self.city)
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn has_valid_coordinates(&self) -> bool {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => valid_latitude(lat) && valid_longitude(lon),
            _ => false,
        }
    }

    /// "城市, 地区, 国家"，全部为空时返回 "Unknown Location"
    pub fn formatted_location(&self) -> String {
        let parts: Vec<&str> = [&self.city, &self.region_name, &self.country]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.trim().is_empty())
            .collect();

        if parts.is_empty() {
            "Unknown Location".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// 记录是否已超过 `max_age`，需要强制刷新
    pub fn is_outdated(&self, max_age: TimeDelta, now: DateTime<Utc>) -> bool {
        now - self.resolved_at > max_age
    }

    /// 扁平的列视图，交给持久化层直接写库
    pub fn to_storage_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("ip_address".into(), Value::from(self.ip.clone()));
        fields.insert("country".into(), opt_string(&self.country));
        fields.insert("country_code".into(), opt_string(&self.country_code));
        fields.insert("region".into(), opt_string(&self.region));
        fields.insert("region_name".into(), opt_string(&self.region_name));
        fields.insert("city".into(), opt_string(&self.city));
        fields.insert("zip".into(), opt_string(&self.zip));
        fields.insert("latitude".into(), opt_number(self.latitude));
        fields.insert("longitude".into(), opt_number(self.longitude));
        fields.insert("timezone".into(), opt_string(&self.timezone));
        fields.insert("isp".into(), opt_string(&self.isp));
        fields.insert("org".into(), opt_string(&self.org));
        fields.insert("as".into(), opt_string(&self.as_number));
        fields.insert(
            "raw_response".into(),
            Value::Object(self.raw_response.clone()),
        );
        fields.insert(
            "geo_updated_at".into(),
            Value::from(self.resolved_at.to_rfc3339()),
        );
        fields
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::from).unwrap_or(Value::Null)
}

fn opt_number(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// 取第一个存在且非空的字段；数字值按文本保存（如 asn: 15169）
fn text_field(raw: &RawProviderResponse, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number_field(raw: &RawProviderResponse, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| match raw.get(*key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
}

fn coordinates(lat: Option<f64>, lon: Option<f64>) -> (Option<f64>, Option<f64>) {
    match (lat, lon) {
        (Some(lat), Some(lon)) if valid_latitude(lat) && valid_longitude(lon) => {
            (Some(lat), Some(lon))
        }
        _ => (None, None),
    }
}

fn valid_latitude(lat: f64) -> bool {
    (-90.0..=90.0).contains(&lat)
}

fn valid_longitude(lon: f64) -> bool {
    (-180.0..=180.0).contains(&lon)
}
