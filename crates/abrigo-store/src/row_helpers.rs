use abrigo_crypto::EncryptedPayload;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreError;

/// Current time in the sortable form every table stores.
pub fn now() -> (DateTime<Utc>, String) {
    let ts = Utc::now();
    let raw = ts.to_rfc3339_opts(SecondsFormat::Micros, true);
    (ts, raw)
}

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp: {e}"),
        })
}

/// Read three adjacent columns (ciphertext, iv, tag) as a payload.
pub fn get_payload(
    row: &rusqlite::Row<'_>,
    start: usize,
    table: &'static str,
) -> Result<EncryptedPayload, StoreError> {
    Ok(EncryptedPayload {
        ciphertext: get(row, start, table, "encrypted")?,
        iv: get(row, start + 1, table, "iv")?,
        auth_tag: get(row, start + 2, table, "auth_tag")?,
    })
}

/// Like [`get_payload`] for nullable triples. Partial triples count as absent.
pub fn get_payload_opt(
    row: &rusqlite::Row<'_>,
    start: usize,
    table: &'static str,
) -> Result<Option<EncryptedPayload>, StoreError> {
    let ciphertext: Option<String> = get_opt(row, start, table, "encrypted")?;
    let iv: Option<String> = get_opt(row, start + 1, table, "iv")?;
    let auth_tag: Option<String> = get_opt(row, start + 2, table, "auth_tag")?;
    Ok(match (ciphertext, iv, auth_tag) {
        (Some(ciphertext), Some(iv), Some(auth_tag)) => Some(EncryptedPayload {
            ciphertext,
            iv,
            auth_tag,
        }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use abrigo_core::risk::RiskLevel;

    #[test]
    fn parse_enum_success() {
        let level: RiskLevel = parse_enum("medium", "users", "risk_level").unwrap();
        assert_eq!(level, RiskLevel::Medium);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<RiskLevel, _> = parse_enum("INVALID", "users", "risk_level");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "users", column: "risk_level", .. })
        ));
    }

    #[test]
    fn timestamps_sort_lexically() {
        let (a_ts, a) = now();
        let (b_ts, b) = now();
        assert!(a <= b);
        assert_eq!(parse_time(&a, "t", "c").unwrap(), a_ts);
        assert_eq!(parse_time(&b, "t", "c").unwrap(), b_ts);
    }

    #[test]
    fn parse_time_failure() {
        assert!(matches!(
            parse_time("yesterday", "messages", "created_at"),
            Err(StoreError::CorruptRow { column: "created_at", .. })
        ));
    }
}
