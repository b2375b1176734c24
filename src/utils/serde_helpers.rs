// Serde helper modules for custom serialization/deserialization
//
// Durations are persisted as whole milliseconds so job and template documents
// stay readable by the surrounding platform.

/// Module for serializing Duration as milliseconds
/// Use with #[serde(with = "crate::utils::serde_helpers::duration_millis")]
pub mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}

/// Module for serializing Optional Duration as milliseconds
/// Use with #[serde(with = "crate::utils::serde_helpers::optional_duration_millis")]
pub mod optional_duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.num_milliseconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis_opt = Option::<i64>::deserialize(deserializer)?;
        Ok(millis_opt.map(Duration::milliseconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct TestStruct {
        #[serde(with = "duration_millis")]
        duration: Duration,
        #[serde(with = "optional_duration_millis", default)]
        optional_duration: Option<Duration>,
    }

    #[test]
    fn test_duration_written_as_millis() {
        let test = TestStruct {
            duration: Duration::milliseconds(1500),
            optional_duration: Some(Duration::seconds(2)),
        };

        let json = serde_json::to_value(&test).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["optional_duration"], 2000);
    }

    #[test]
    fn test_optional_duration_missing_field() {
        let parsed: TestStruct = serde_json::from_str(r#"{"duration": 60000}"#).unwrap();

        assert_eq!(parsed.duration, Duration::minutes(1));
        assert!(parsed.optional_duration.is_none());
    }
}
