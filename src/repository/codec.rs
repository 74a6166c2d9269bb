// ==========================================
// 锻造生产追溯系统 - 行编解码辅助
// ==========================================
// 时间: TEXT "%Y-%m-%d %H:%M:%S"; 日期: TEXT "%Y-%m-%d"
// 解析失败一律转为 FromSqlConversionFailure, 不做静默兜底
// ==========================================

use crate::domain::types::ParseEnumError;
use chrono::{Local, NaiveDate, NaiveDateTime, SubsecRound};
use rusqlite::types::Type;

pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 当前时间 (秒精度, 与落库精度一致)
pub fn now_ts() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

pub fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn fmt_opt_ts(ts: Option<NaiveDateTime>) -> Option<String> {
    ts.map(fmt_ts)
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

pub fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn parse_enum<T>(
    idx: usize,
    raw: &str,
    parse: fn(&str) -> Result<T, ParseEnumError>,
) -> rusqlite::Result<T> {
    parse(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 件数列 (非负整数)
pub fn get_count(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let v: i64 = row.get(idx)?;
    u32::try_from(v).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

pub fn get_opt_count(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<u32>> {
    let v: Option<i64> = row.get(idx)?;
    v.map(|v| {
        u32::try_from(v)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip_at_second_precision() {
        let ts = now_ts();
        assert_eq!(parse_ts(0, &fmt_ts(ts)).unwrap(), ts);
    }

    #[test]
    fn test_bad_values_are_conversion_failures() {
        assert!(parse_ts(3, "2025/01/01").is_err());
        assert!(parse_enum(1, "WELDING", crate::domain::types::OperationType::parse).is_err());
    }
}
