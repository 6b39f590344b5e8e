//! Quote Normalization
//!
//! Turns raw feed ticks and recorded file rows into the canonical quote
//! document pushed to the endpoint.
//!
//! # Document Shape
//!
//! ```json
//! {"dataset":"<id>","typeId":"<id>","timestamp":1704110400000,
//!  "bidPrice":1.1000,"askPrice":1.1002,"spread":0.0002,"quoteTime":1704110400000}
//! ```
//!
//! File-mode documents carry the configured fields instead of
//! `bidPrice`/`askPrice`/`spread`/`quoteTime`. Decimal values are JSON
//! numbers written in plain notation with their input scale preserved.


use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::subscription::{DatasetId, FieldMapping, SourceKey};
use super::timestamp::{OffsetPolicy, TimestampState, reconstruct};

/// Wall-clock layout of the live feed's date and time tokens.
pub const LIVE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

// =============================================================================
// Errors
// =============================================================================

/// A record that cannot be turned into a quote document.
///
/// Reported per record; the pipeline drops the record and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecordError {
    /// A required payload token is absent.
    #[error("missing {0} token")]
    MissingToken(&'static str),

    /// A mapped column is past the end of the row.
    #[error("row has no column {index} (width {width})")]
    MissingColumn {
        /// Requested column.
        index: usize,
        /// Number of cells in the row.
        width: usize,
    },

    /// Timestamp text does not match the expected layout.
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp {
        /// Offending text.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Local time falls into a daylight-saving gap of the source zone.
    #[error("local time '{value}' does not exist in {zone}")]
    NonexistentLocalTime {
        /// Offending text.
        value: String,
        /// Source time zone.
        zone: String,
    },

    /// A price or field value is not a decimal number.
    #[error("invalid decimal for {field}: '{value}'")]
    InvalidDecimal {
        /// Field being parsed.
        field: String,
        /// Offending text.
        value: String,
    },

    /// A decimal value carries more precision than can be emitted exactly.
    #[error("decimal for {field} cannot be represented exactly: '{value}'")]
    InexactDecimal {
        /// Field being parsed.
        field: String,
        /// Offending text.
        value: String,
    },

    /// A derived field falls outside the decimal range.
    #[error("{field} overflows the decimal range")]
    Overflow {
        /// Derived field.
        field: &'static str,
    },
}

// =============================================================================
// Raw Tick
// =============================================================================

/// One advisory update as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTick {
    /// Wall-clock arrival, milliseconds since the Unix epoch.
    pub received_at: i64,
    /// Feed symbol.
    pub source_key: SourceKey,
    /// Space-separated `date time bid ask`.
    pub payload: String,
}

impl RawTick {
    /// Stamp a tick with the current wall clock.
    #[must_use]
    pub fn now(source_key: impl Into<SourceKey>, payload: impl Into<String>) -> Self {
        Self {
            received_at: chrono::Utc::now().timestamp_millis(),
            source_key: source_key.into(),
            payload: payload.into(),
        }
    }
}

// =============================================================================
// Quote Document
// =============================================================================

/// Canonical quote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteDocument {
    /// Destination dataset.
    pub dataset: DatasetId,
    /// Configured quote type identifier.
    pub type_id: String,
    /// UTC milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Decimal fields in emission order.
    pub fields: Vec<(String, Decimal)>,
    /// Second-precision quote time (live documents only).
    pub quote_time: Option<i64>,
}

impl QuoteDocument {
    #[cfg(test)]
    fn field(&self, name: &str) -> Option<&Decimal> {
        self.fields
            .iter()
            .find_map(|(field, value)| (field == name).then_some(value))
    }

    /// Serialize the document to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen with valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decimal written as a plain JSON number.
struct PlainDecimal<'a>(&'a Decimal);

impl Serialize for PlainDecimal<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::arbitrary_precision::serialize(self.0, serializer)
    }
}

impl Serialize for QuoteDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 3 + self.fields.len() + usize::from(self.quote_time.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("dataset", self.dataset.as_str())?;
        map.serialize_entry("typeId", &self.type_id)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, &PlainDecimal(value))?;
        }
        if let Some(quote_time) = self.quote_time {
            map.serialize_entry("quoteTime", &quote_time)?;
        }
        map.end()
    }
}

/// Largest scale a `Decimal` can hold.
const MAX_DECIMAL_SCALE: i64 = 28;

/// Parse a decimal in plain or scientific notation.
///
/// Values that would need rounding to fit are rejected rather than emitted
/// with fewer digits than the input carried.
///
/// # Errors
///
/// Returns `MalformedRecordError::InvalidDecimal` naming `field` for text that
/// is not a number, and `MalformedRecordError::InexactDecimal` for a number
/// that cannot be held without rounding.
pub fn parse_decimal(field: &str, text: &str) -> Result<Decimal, MalformedRecordError> {
    let text = text.trim();
    let invalid = || MalformedRecordError::InvalidDecimal {
        field: field.to_string(),
        value: text.to_string(),
    };
    let inexact = || MalformedRecordError::InexactDecimal {
        field: field.to_string(),
        value: text.to_string(),
    };

    let Some((mantissa, exponent)) = text.split_once(['e', 'E']) else {
        return Decimal::from_str_exact(text).map_err(|e| match e {
            rust_decimal::Error::Underflow => inexact(),
            _ => invalid(),
        });
    };

    let mantissa = Decimal::from_str_exact(mantissa).map_err(|e| match e {
        rust_decimal::Error::Underflow => inexact(),
        _ => invalid(),
    })?;
    let exponent: i64 = exponent.parse().map_err(|_| invalid())?;
    if i64::from(mantissa.normalize().scale()).saturating_sub(exponent) > MAX_DECIMAL_SCALE {
        return Err(inexact());
    }
    Decimal::from_scientific(text).map_err(|_| invalid())
}

// =============================================================================
// Live Normalizer
// =============================================================================

/// Normalizes live feed ticks.
#[derive(Debug, Clone)]
pub struct LiveNormalizer {
    type_id: String,
    offsets: OffsetPolicy,
}

impl LiveNormalizer {
    /// Create a normalizer for the given quote type.
    #[must_use]
    pub fn new(type_id: impl Into<String>, offsets: OffsetPolicy) -> Self {
        Self {
            type_id: type_id.into(),
            offsets,
        }
    }

    /// Normalize a tick using the offset in force right now.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecordError` if the payload is incomplete or unparsable.
    pub fn normalize(
        &self,
        dataset: &DatasetId,
        tick: &RawTick,
        state: &mut TimestampState,
    ) -> Result<QuoteDocument, MalformedRecordError> {
        self.normalize_with_offset(dataset, tick, self.offsets.current_offset_millis(), state)
    }

    /// Normalize a tick with an explicit UTC offset in milliseconds.
    ///
    /// The timestamp state is only touched once the whole payload has parsed,
    /// so a malformed tick leaves the same-second bookkeeping unchanged.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecordError` if the payload is incomplete or unparsable.
    pub fn normalize_with_offset(
        &self,
        dataset: &DatasetId,
        tick: &RawTick,
        offset_millis: i64,
        state: &mut TimestampState,
    ) -> Result<QuoteDocument, MalformedRecordError> {
        let mut tokens = tick.payload.split_whitespace();
        let date = tokens.next().ok_or(MalformedRecordError::MissingToken("date"))?;
        let time = tokens.next().ok_or(MalformedRecordError::MissingToken("time"))?;
        let bid_text = tokens.next().ok_or(MalformedRecordError::MissingToken("bid"))?;
        let ask_text = tokens.next().ok_or(MalformedRecordError::MissingToken("ask"))?;

        let date_time = format!("{date} {time}");
        let wall = NaiveDateTime::parse_from_str(&date_time, LIVE_TIME_FORMAT).map_err(|e| {
            MalformedRecordError::InvalidTimestamp {
                value: date_time.clone(),
                reason: e.to_string(),
            }
        })?;

        let bid = parse_decimal("bidPrice", bid_text)?;
        let ask = parse_decimal("askPrice", ask_text)?;
        let spread = ask
            .checked_sub(bid)
            .ok_or(MalformedRecordError::Overflow { field: "spread" })?;

        let quote_time = wall.and_utc().timestamp_millis() - offset_millis;
        let timestamp = reconstruct(quote_time, tick.received_at, state);

        Ok(QuoteDocument {
            dataset: dataset.clone(),
            type_id: self.type_id.clone(),
            timestamp,
            fields: vec![
                ("bidPrice".to_string(), bid),
                ("askPrice".to_string(), ask),
                ("spread".to_string(), spread),
            ],
            quote_time: Some(quote_time),
        })
    }
}

// =============================================================================
// Row Normalizer
// =============================================================================

/// Normalizes recorded file rows.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    type_id: String,
    timestamp_column: usize,
    timestamp_format: String,
    source_zone: Tz,
}

impl RowNormalizer {
    /// Create a normalizer for rows with the timestamp in `timestamp_column`.
    #[must_use]
    pub fn new(
        type_id: impl Into<String>,
        timestamp_column: usize,
        timestamp_format: impl Into<String>,
        source_zone: Tz,
    ) -> Self {
        Self {
            type_id: type_id.into(),
            timestamp_column,
            timestamp_format: timestamp_format.into(),
            source_zone,
        }
    }

    /// Parse a source-zone local time into UTC milliseconds.
    ///
    /// Ambiguous local times (the repeated hour when clocks fall back)
    /// resolve to the earlier instant.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecordError` if the text does not match the format
    /// or names a local time skipped by the zone.
    pub fn parse_timestamp(&self, text: &str) -> Result<i64, MalformedRecordError> {
        let local = NaiveDateTime::parse_from_str(text.trim(), &self.timestamp_format).map_err(
            |e| MalformedRecordError::InvalidTimestamp {
                value: text.to_string(),
                reason: e.to_string(),
            },
        )?;

        self.source_zone
            .from_local_datetime(&local)
            .earliest()
            .map(|zoned| zoned.timestamp_millis())
            .ok_or_else(|| MalformedRecordError::NonexistentLocalTime {
                value: text.to_string(),
                zone: self.source_zone.name().to_string(),
            })
    }

    /// Normalize one row, emitting `fields` in their configured order.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecordError` if a column is missing or a cell is unparsable.
    pub fn normalize<S: AsRef<str>>(
        &self,
        dataset: &DatasetId,
        row: &[S],
        fields: &[FieldMapping],
    ) -> Result<QuoteDocument, MalformedRecordError> {
        let timestamp = self.parse_timestamp(cell(row, self.timestamp_column)?)?;

        let fields = fields
            .iter()
            .map(|mapping| {
                let text = cell(row, mapping.column_index)?;
                parse_decimal(&mapping.field_name, text)
                    .map(|value| (mapping.field_name.clone(), value))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QuoteDocument {
            dataset: dataset.clone(),
            type_id: self.type_id.clone(),
            timestamp,
            fields,
            quote_time: None,
        })
    }
}

fn cell<S: AsRef<str>>(row: &[S], index: usize) -> Result<&str, MalformedRecordError> {
    row.get(index)
        .map(AsRef::as_ref)
        .ok_or(MalformedRecordError::MissingColumn {
            index,
            width: row.len(),
        })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const JAN_1_NOON_UTC_MS: i64 = 1_704_110_400_000;

    fn live() -> LiveNormalizer {
        LiveNormalizer::new("fx-quote", OffsetPolicy::default())
    }

    fn tick(payload: &str, received_at: i64) -> RawTick {
        RawTick {
            received_at,
            source_key: "EURUSD".to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn live_document_fields_and_order() {
        let mut state = TimestampState::new();
        let doc = live()
            .normalize_with_offset(
                &DatasetId::new("DS1"),
                &tick("2024/01/01 12:00:00 1.1000 1.1002", 5),
                7_200_000,
                &mut state,
            )
            .unwrap();

        let expected = JAN_1_NOON_UTC_MS - 7_200_000;
        assert_eq!(doc.timestamp, expected);
        assert_eq!(doc.quote_time, Some(expected));
        assert_eq!(
            doc.to_json().unwrap(),
            format!(
                r#"{{"dataset":"DS1","typeId":"fx-quote","timestamp":{expected},"bidPrice":1.1000,"askPrice":1.1002,"spread":0.0002,"quoteTime":{expected}}}"#
            )
        );
    }

    #[test_case("1.2", "1.234", "0.034" ; "differing scales")]
    #[test_case("1.1000", "1.1002", "0.0002" ; "same scale")]
    #[test_case("150", "150.05", "0.05" ; "integer bid")]
    #[test_case("1.3", "1.2", "-0.1" ; "crossed quote")]
    #[test_case("1E-4", "3E-4", "0.0002" ; "scientific input")]
    fn spread_is_exact(bid: &str, ask: &str, spread: &str) {
        let mut state = TimestampState::new();
        let doc = live()
            .normalize_with_offset(
                &DatasetId::new("DS1"),
                &tick(&format!("2024/01/01 12:00:00 {bid} {ask}"), 0),
                0,
                &mut state,
            )
            .unwrap();

        assert_eq!(doc.field("spread").unwrap().to_string(), spread);
    }

    #[test_case("" , MalformedRecordError::MissingToken("date") ; "empty payload")]
    #[test_case("2024/01/01", MalformedRecordError::MissingToken("time") ; "date only")]
    #[test_case("2024/01/01 12:00:00", MalformedRecordError::MissingToken("bid") ; "no prices")]
    #[test_case("2024/01/01 12:00:00 1.1", MalformedRecordError::MissingToken("ask") ; "no ask")]
    fn live_missing_tokens(payload: &str, expected: MalformedRecordError) {
        let mut state = TimestampState::new();
        let err = live()
            .normalize_with_offset(&DatasetId::new("DS1"), &tick(payload, 0), 0, &mut state)
            .unwrap_err();
        assert_eq!(err, expected);
    }

    #[test]
    fn live_bad_timestamp_and_decimal() {
        let mut state = TimestampState::new();
        let normalizer = live();
        let dataset = DatasetId::new("DS1");

        let err = normalizer
            .normalize_with_offset(&dataset, &tick("2024-01-01 12:00:00 1 2", 0), 0, &mut state)
            .unwrap_err();
        assert!(matches!(err, MalformedRecordError::InvalidTimestamp { .. }));

        let err = normalizer
            .normalize_with_offset(&dataset, &tick("2024/01/01 12:00:00 abc 2", 0), 0, &mut state)
            .unwrap_err();
        assert!(matches!(err, MalformedRecordError::InvalidDecimal { ref field, .. } if field == "bidPrice"));
    }

    #[test]
    fn spread_overflow_is_malformed() {
        let mut state = TimestampState::new();
        let err = live()
            .normalize_with_offset(
                &DatasetId::new("DS1"),
                &tick(
                    "2024/01/01 12:00:00 -79228162514264337593543950335 79228162514264337593543950335",
                    0,
                ),
                0,
                &mut state,
            )
            .unwrap_err();
        assert_eq!(err, MalformedRecordError::Overflow { field: "spread" });
        assert_eq!(state, TimestampState::new());
    }

    #[test_case("1.00000000000000000000000000001" ; "too many fraction digits")]
    #[test_case("1.00000000000000000000000000001E0" ; "too many mantissa digits")]
    #[test_case("1E-29" ; "exponent past the scale limit")]
    fn decimal_that_would_round_is_rejected(text: &str) {
        let err = parse_decimal("bid", text).unwrap_err();
        assert!(matches!(err, MalformedRecordError::InexactDecimal { ref field, .. } if field == "bid"));
    }

    #[test_case("1.0000000000000000000000000001", "1.0000000000000000000000000001" ; "full scale")]
    #[test_case("2.5E-3", "0.0025" ; "scientific")]
    #[test_case(" 140.10 ", "140.10" ; "padded")]
    fn decimal_is_parsed_exactly(text: &str, expected: &str) {
        assert_eq!(parse_decimal("bid", text).unwrap().to_string(), expected);
    }

    #[test_case("abc" ; "not a number")]
    #[test_case("1Ex" ; "bad exponent")]
    #[test_case("" ; "empty")]
    fn decimal_garbage_is_invalid(text: &str) {
        let err = parse_decimal("bid", text).unwrap_err();
        assert!(matches!(err, MalformedRecordError::InvalidDecimal { .. }));
    }

    #[test]
    fn malformed_tick_leaves_state_untouched() {
        let mut state = TimestampState::new();
        let normalizer = live();
        let dataset = DatasetId::new("DS1");

        let _ = normalizer
            .normalize_with_offset(&dataset, &tick("2024/01/01 12:00:00 1 2", 10), 0, &mut state)
            .unwrap();
        let before = state.clone();
        let _ = normalizer
            .normalize_with_offset(&dataset, &tick("2024/01/01 12:00:00 x 2", 11), 0, &mut state)
            .unwrap_err();
        assert_eq!(state, before);
    }

    #[test]
    fn live_extra_tokens_are_ignored() {
        let mut state = TimestampState::new();
        let doc = live()
            .normalize_with_offset(
                &DatasetId::new("DS1"),
                &tick("2024/01/01 12:00:00 1.1 1.2 99 extra", 0),
                0,
                &mut state,
            )
            .unwrap();
        assert_eq!(doc.fields.len(), 3);
    }

    #[test]
    fn same_second_ticks_get_synthesized_millis() {
        let mut state = TimestampState::new();
        let normalizer = live();
        let dataset = DatasetId::new("DS1");

        let first = normalizer
            .normalize_with_offset(&dataset, &tick("2024/01/01 12:00:00 1 2", 1_000), 0, &mut state)
            .unwrap();
        let second = normalizer
            .normalize_with_offset(&dataset, &tick("2024/01/01 12:00:00 1 2", 1_005), 0, &mut state)
            .unwrap();

        assert_eq!(first.timestamp, JAN_1_NOON_UTC_MS);
        assert_eq!(second.timestamp, JAN_1_NOON_UTC_MS + 6);
        assert_eq!(second.quote_time, Some(JAN_1_NOON_UTC_MS));
    }

    fn fields() -> Vec<FieldMapping> {
        vec![
            FieldMapping {
                field_name: "bid".to_string(),
                column_index: 2,
            },
            FieldMapping {
                field_name: "ask".to_string(),
                column_index: 3,
            },
        ]
    }

    #[test]
    fn row_document_in_utc() {
        let normalizer = RowNormalizer::new("fx-quote", 1, "%Y-%m-%dT%H:%M:%S", chrono_tz::UTC);
        let row = ["EURUSD", "2024-01-01T12:00:00", "1.1000", "1.1002"];
        let doc = normalizer
            .normalize(&DatasetId::new("DS1"), &row, &fields())
            .unwrap();

        assert_eq!(
            doc.to_json().unwrap(),
            format!(
                r#"{{"dataset":"DS1","typeId":"fx-quote","timestamp":{JAN_1_NOON_UTC_MS},"bid":1.1000,"ask":1.1002}}"#
            )
        );
    }

    #[test]
    fn row_timestamp_is_converted_from_source_zone() {
        let normalizer = RowNormalizer::new(
            "fx-quote",
            1,
            "%Y-%m-%dT%H:%M:%S",
            chrono_tz::America::New_York,
        );
        // EST is UTC-5 in January.
        assert_eq!(
            normalizer.parse_timestamp("2024-01-01T07:00:00").unwrap(),
            JAN_1_NOON_UTC_MS
        );
    }

    #[test]
    fn row_timestamp_keeps_fractional_millis() {
        let normalizer =
            RowNormalizer::new("fx-quote", 0, "%Y-%m-%d %H:%M:%S%.f", chrono_tz::UTC);
        assert_eq!(
            normalizer.parse_timestamp("2024-01-01 12:00:00.250").unwrap(),
            JAN_1_NOON_UTC_MS + 250
        );
    }

    #[test]
    fn row_timestamp_in_dst_gap_is_rejected() {
        let normalizer = RowNormalizer::new(
            "fx-quote",
            0,
            "%Y-%m-%d %H:%M:%S",
            chrono_tz::America::New_York,
        );
        let err = normalizer.parse_timestamp("2024-03-10 02:30:00").unwrap_err();
        assert!(matches!(err, MalformedRecordError::NonexistentLocalTime { .. }));
    }

    #[test]
    fn row_ambiguous_time_takes_earlier_instant() {
        let normalizer = RowNormalizer::new(
            "fx-quote",
            0,
            "%Y-%m-%d %H:%M:%S",
            chrono_tz::America::New_York,
        );
        // 01:30 EDT (UTC-4) on the fall-back day is 05:30 UTC.
        let expected = chrono::Utc
            .with_ymd_and_hms(2024, 11, 3, 5, 30, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(
            normalizer.parse_timestamp("2024-11-03 01:30:00").unwrap(),
            expected
        );
    }

    #[test]
    fn row_missing_column() {
        let normalizer = RowNormalizer::new("fx-quote", 1, "%Y-%m-%dT%H:%M:%S", chrono_tz::UTC);
        let row = ["EURUSD", "2024-01-01T12:00:00", "1.1000"];
        let err = normalizer
            .normalize(&DatasetId::new("DS1"), &row, &fields())
            .unwrap_err();
        assert_eq!(err, MalformedRecordError::MissingColumn { index: 3, width: 3 });
    }

    #[test]
    fn row_bad_decimal_names_field() {
        let normalizer = RowNormalizer::new("fx-quote", 1, "%Y-%m-%dT%H:%M:%S", chrono_tz::UTC);
        let row = ["EURUSD", "2024-01-01T12:00:00", "1.1000", "n/a"];
        let err = normalizer
            .normalize(&DatasetId::new("DS1"), &row, &fields())
            .unwrap_err();
        assert!(matches!(err, MalformedRecordError::InvalidDecimal { ref field, .. } if field == "ask"));
    }

    #[test]
    fn scientific_decimal_is_written_plain() {
        let value = parse_decimal("x", "1.5E-3").unwrap();
        let doc = QuoteDocument {
            dataset: DatasetId::new("DS1"),
            type_id: "t".to_string(),
            timestamp: 0,
            fields: vec![("x".to_string(), value)],
            quote_time: None,
        };
        assert_eq!(
            doc.to_json().unwrap(),
            r#"{"dataset":"DS1","typeId":"t","timestamp":0,"x":0.0015}"#
        );
    }
}
