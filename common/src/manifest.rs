use serde::Deserialize;

use crate::{
    config::{ApiRoutes, DeviceContext},
    error::UpdateError,
    routes::with_query,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    update_available: Option<bool>,
    message: Option<String>,
    latest_version: Option<String>,
    size: Option<i64>,
    sha256: Option<String>,
}

/// Parsed firmware-check response. `version`, `size_bytes` and
/// `download_path` are only meaningful when `update_available` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareManifest {
    pub update_available: bool,
    pub version: String,
    pub size_bytes: u32,
    pub download_path: String,
    pub message: Option<String>,
    pub sha256: Option<String>,
}

impl FirmwareManifest {
    /// Parses the JSON object spanning the first `{` to the last `}` of
    /// `body`, ignoring anything around it.
    pub fn parse(body: &str, ctx: &DeviceContext, routes: &ApiRoutes) -> Result<Self, UpdateError> {
        let json = match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => &body[start..=end],
            _ => body,
        };
        let raw: RawManifest = serde_json::from_str(json)?;

        let update_available = raw
            .update_available
            .ok_or(UpdateError::ManifestIncomplete("updateAvailable"))?;
        if !update_available {
            return Ok(Self {
                update_available,
                version: String::new(),
                size_bytes: 0,
                download_path: String::new(),
                message: raw.message,
                sha256: None,
            });
        }

        let version = raw
            .latest_version
            .filter(|version| !version.trim().is_empty())
            .ok_or(UpdateError::ManifestIncomplete("latestVersion"))?;
        let size = raw.size.ok_or(UpdateError::ManifestIncomplete("size"))?;
        let size_bytes = u32::try_from(size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or(UpdateError::InvalidSize(size))?;

        let download_path = with_query(
            &routes.firmware_download,
            &[
                ("deviceId", ctx.device_id.as_str()),
                ("version", version.as_str()),
                ("modelType", ctx.model_type.as_str()),
            ],
        );

        Ok(Self {
            update_available,
            version,
            size_bytes,
            download_path,
            message: raw.message,
            sha256: raw
                .sha256
                .map(|digest| digest.trim().to_ascii_lowercase())
                .filter(|digest| !digest.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ctx() -> DeviceContext {
        DeviceContext {
            device_id: "a1b2c3d4e5f6".to_string(),
            model_type: "ESP32_C3_DHT22".to_string(),
            firmware_version: "1.0.0".to_string(),
        }
    }

    fn parse(body: &str) -> Result<FirmwareManifest, UpdateError> {
        FirmwareManifest::parse(body, &ctx(), &ApiRoutes::default())
    }

    #[test]
    fn update_available_derives_download_path() {
        let manifest =
            parse(r#"{"updateAvailable":true,"latestVersion":"1.2","size":1000}"#).unwrap();

        assert_eq!(
            manifest,
            FirmwareManifest {
                update_available: true,
                version: "1.2".to_string(),
                size_bytes: 1000,
                download_path: "/api/firmware/download?deviceId=a1b2c3d4e5f6&version=1.2&modelType=ESP32_C3_DHT22".to_string(),
                message: None,
                sha256: None,
            }
        );
    }

    #[test]
    fn no_update_keeps_message() {
        let manifest = parse(r#"{"updateAvailable":false,"message":"up to date"}"#).unwrap();

        assert!(!manifest.update_available);
        assert_eq!(manifest.message.as_deref(), Some("up to date"));
    }

    #[test]
    fn tolerates_text_around_object() {
        let manifest = parse("noise {\"updateAvailable\":false} trailer\r\n").unwrap();
        assert!(!manifest.update_available);
    }

    #[test]
    fn version_with_reserved_characters_is_encoded() {
        let manifest =
            parse(r#"{"updateAvailable":true,"latestVersion":"2.0 beta+1","size":5}"#).unwrap();
        assert!(manifest.download_path.contains("version=2.0%20beta%2B1"));
    }

    #[test]
    fn missing_fields_are_incomplete_only_when_update_available() {
        assert!(matches!(
            parse(r#"{"updateAvailable":true,"size":10}"#),
            Err(UpdateError::ManifestIncomplete("latestVersion"))
        ));
        assert!(matches!(
            parse(r#"{"updateAvailable":true,"latestVersion":"1.1"}"#),
            Err(UpdateError::ManifestIncomplete("size"))
        ));
        assert!(matches!(
            parse(r#"{"message":"hi"}"#),
            Err(UpdateError::ManifestIncomplete("updateAvailable"))
        ));
        assert!(parse(r#"{"updateAvailable":false}"#).is_ok());
    }

    #[test]
    fn non_positive_or_oversized_size_is_invalid() {
        assert!(matches!(
            parse(r#"{"updateAvailable":true,"latestVersion":"1.1","size":0}"#),
            Err(UpdateError::InvalidSize(0))
        ));
        assert!(matches!(
            parse(r#"{"updateAvailable":true,"latestVersion":"1.1","size":-4}"#),
            Err(UpdateError::InvalidSize(-4))
        ));
        assert!(matches!(
            parse(r#"{"updateAvailable":true,"latestVersion":"1.1","size":5000000000}"#),
            Err(UpdateError::InvalidSize(5_000_000_000))
        ));
    }

    #[test]
    fn invalid_json_is_parse_error() {
        assert!(matches!(parse("<html>502</html>"), Err(UpdateError::JsonParse(_))));
        assert!(matches!(parse(""), Err(UpdateError::JsonParse(_))));
    }

    #[test]
    fn digest_is_normalised() {
        let manifest = parse(
            r#"{"updateAvailable":true,"latestVersion":"1.1","size":3,"sha256":" ABCDEF "}"#,
        )
        .unwrap();
        assert_eq!(manifest.sha256.as_deref(), Some("abcdef"));
    }
}
