use std::{cmp::Ordering, fmt::Write as _, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The image offered to nodes, loaded once at startup.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub version: String,
    pub model_type: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

impl FirmwareImage {
    pub fn new(version: impl Into<String>, model_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let mut sha256 = String::with_capacity(64);
        for byte in Sha256::digest(&bytes) {
            let _ = write!(&mut sha256, "{byte:02x}");
        }

        Self {
            version: version.into(),
            model_type: model_type.into(),
            bytes,
            sha256,
        }
    }

    pub fn load(path: &Path, version: &str, model_type: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read firmware image {}", path.display()))?;
        anyhow::ensure!(!bytes.is_empty(), "firmware image {} is empty", path.display());
        Ok(Self::new(version, model_type, bytes))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    pub device_id: String,
    pub current_version: String,
    pub model_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub device_id: String,
    pub version: String,
    pub model_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub update_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub message: String,
}

impl CheckResponse {
    fn up_to_date(message: impl Into<String>) -> Self {
        Self {
            update_available: false,
            latest_version: None,
            size: None,
            sha256: None,
            message: message.into(),
        }
    }
}

pub fn check(image: Option<&FirmwareImage>, query: &CheckQuery) -> CheckResponse {
    let Some(image) = image else {
        return CheckResponse::up_to_date("No firmware published");
    };

    if image.model_type != query.model_type {
        return CheckResponse::up_to_date(format!(
            "No firmware for model {}",
            query.model_type
        ));
    }

    if compare_versions(&image.version, &query.current_version) != Ordering::Greater {
        return CheckResponse::up_to_date(format!(
            "Firmware {} is up to date",
            query.current_version
        ));
    }

    CheckResponse {
        update_available: true,
        latest_version: Some(image.version.clone()),
        size: Some(image.size()),
        sha256: Some(image.sha256.clone()),
        message: format!("Update {} available", image.version),
    }
}

/// Returns the image when the request names the published version and model.
pub fn select<'a>(
    image: Option<&'a FirmwareImage>,
    query: &DownloadQuery,
) -> Option<&'a FirmwareImage> {
    image.filter(|image| image.version == query.version && image.model_type == query.model_type)
}

/// Dotted numeric comparison; missing or non-numeric parts count as zero.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |version: &str| -> Vec<u64> {
        version
            .trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };

    let left = parse(left);
    let right = parse(right);
    let len = left.len().max(right.len());

    for idx in 0..len {
        let a = left.get(idx).copied().unwrap_or(0);
        let b = right.get(idx).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn image() -> FirmwareImage {
        FirmwareImage::new("1.2.0", "ESP32_C3_DHT22", b"abc".to_vec())
    }

    fn check_query(version: &str) -> CheckQuery {
        CheckQuery {
            device_id: "a1b2c3d4e5f6".to_string(),
            current_version: version.to_string(),
            model_type: "ESP32_C3_DHT22".to_string(),
        }
    }

    #[test]
    fn digest_is_lowercase_hex() {
        assert_eq!(
            image().sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn older_node_is_offered_update() {
        let image = image();
        let response = check(Some(&image), &check_query("1.1.9"));

        assert_eq!(
            response,
            CheckResponse {
                update_available: true,
                latest_version: Some("1.2.0".to_string()),
                size: Some(3),
                sha256: Some(image.sha256.clone()),
                message: "Update 1.2.0 available".to_string(),
            }
        );
    }

    #[test]
    fn current_or_newer_node_is_up_to_date() {
        let image = image();

        assert!(!check(Some(&image), &check_query("1.2.0")).update_available);
        assert!(!check(Some(&image), &check_query("1.10.0")).update_available);
    }

    #[test]
    fn other_models_and_missing_image_are_up_to_date() {
        let image = image();
        let mut query = check_query("0.1.0");
        query.model_type = "OTHER".to_string();

        assert!(!check(Some(&image), &query).update_available);
        assert!(!check(None, &check_query("0.1.0")).update_available);
    }

    #[test]
    fn up_to_date_response_omits_update_fields() {
        let body = serde_json::to_string(&check(None, &check_query("1.0.0"))).unwrap();
        assert_eq!(
            body,
            r#"{"updateAvailable":false,"message":"No firmware published"}"#
        );
    }

    #[test]
    fn download_requires_matching_version() {
        let image = image();
        let mut query = DownloadQuery {
            device_id: "a1b2c3d4e5f6".to_string(),
            version: "1.2.0".to_string(),
            model_type: "ESP32_C3_DHT22".to_string(),
        };
        assert!(select(Some(&image), &query).is_some());

        query.version = "1.1.0".to_string();
        assert!(select(Some(&image), &query).is_none());
    }

    #[test]
    fn versions_compare_numerically() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("v2.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.9", "1.0"), Ordering::Less);
    }
}
