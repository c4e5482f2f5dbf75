pub mod checksum;
pub mod gzip;
pub mod logger;

/// UTC timestamp token used in artifact file names, e.g. `20250807T141503`.
pub fn timestamp_token(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%dT%H%M%S").to_string()
}

/// Parse a timestamp token back out of an artifact file name.
///
/// Artifact names look like `db_20250807T141503.dump.gz`; the token is the
/// first `_`-delimited field after the component prefix.
pub fn parse_timestamp_token(file_name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let stem = file_name.split_once('_').map(|(_, rest)| rest)?;
    let token: String = stem.chars().take_while(|c| c.is_ascii_alphanumeric()).collect();
    chrono::NaiveDateTime::parse_from_str(&token, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}
