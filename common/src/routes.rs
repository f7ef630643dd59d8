pub const API_REGISTER_ROUTE: &str = "/api/device/register";
pub const API_DATA_ROUTE: &str = "/api/devices/readings";
pub const API_FIRMWARE_CHECK_ROUTE: &str = "/api/firmware/check";
pub const API_FIRMWARE_DOWNLOAD_ROUTE: &str = "/api/firmware/download";

/// Appends `params` to `path` as a query string, percent-encoding every
/// value byte outside the unreserved set.
pub fn with_query(path: &str, params: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(path.len() + 64);
    out.push_str(path);

    for (index, (key, value)) in params.iter().enumerate() {
        out.push(if index == 0 && !path.contains('?') {
            '?'
        } else {
            '&'
        });
        encode_into(&mut out, key);
        out.push('=');
        encode_into(&mut out, value);
    }

    out
}

fn encode_into(out: &mut String, value: &str) {
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(char::from(HEX[(byte >> 4) as usize]));
            out.push(char::from(HEX[(byte & 0x0f) as usize]));
        }
    }
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_firmware_check_query() {
        let path = with_query(
            API_FIRMWARE_CHECK_ROUTE,
            &[
                ("deviceId", "a1b2c3d4e5f6"),
                ("currentVersion", "0.1.0"),
                ("modelType", "ESP32_C3_DHT22"),
            ],
        );

        assert_eq!(
            path,
            "/api/firmware/check?deviceId=a1b2c3d4e5f6&currentVersion=0.1.0&modelType=ESP32_C3_DHT22"
        );
    }

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(with_query("/x", &[("v", "1.2 beta&b")]), "/x?v=1.2%20beta%26b");
        assert_eq!(with_query("/x?a=1", &[("b", "2")]), "/x?a=1&b=2");
    }
}
