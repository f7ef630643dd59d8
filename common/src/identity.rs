use std::fmt::Write as _;

/// Station MAC rendered as 12 lowercase hex digits.
pub fn device_id_from_mac(mac: [u8; 6]) -> String {
    let mut id = String::with_capacity(12);
    for byte in mac {
        let _ = write!(&mut id, "{byte:02x}");
    }
    id
}
