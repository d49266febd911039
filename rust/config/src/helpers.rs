use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub fn deserialize_duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

pub fn deserialize_duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "deserialize_duration_from_seconds")]
        timeout: Duration,
    }

    #[test]
    fn duration_from_seconds() {
        let holder: Holder = serde_json::from_str(r#"{"timeout": 30}"#).unwrap();
        assert_eq!(holder.timeout, Duration::from_secs(30));
    }
}
