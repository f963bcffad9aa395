use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mqtt3::QoS;

/// Durations accept `90s`, `500ms`, or a plain number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| format!("invalid duration {value:?}"))?;
        return Ok(Duration::from_millis(ms));
    }
    let secs = value.strip_suffix('s').unwrap_or(value);
    let secs: u64 = secs
        .parse()
        .map_err(|_| format!("invalid duration {value:?}"))?;
    Ok(Duration::from_secs(secs))
}

pub fn parse_qos(value: &str) -> Result<QoS, String> {
    match value {
        "0" => Ok(QoS::AtMostOnce),
        "1" => Ok(QoS::AtLeastOnce),
        "2" => Ok(QoS::ExactlyOnce),
        _ => Err(format!("invalid QoS {value:?}; use 0, 1 or 2")),
    }
}

/// Unique-enough identifier for one-shot invocations.
pub fn generated_client_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("mqttv3-{millis}")
}
