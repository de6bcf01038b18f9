pub const SELECT_DEVICE_TOKEN: &str = r#"
SELECT device_token FROM driver_devices WHERE driver_id = $1 ORDER BY updated_at DESC LIMIT 1;
"#;
