use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Display;

/// How a numeric cell is meant to be read, derived from its number format.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum NumberKind {
    #[default]
    Plain,
    Date,
    DateTime,
    /// Time of day or elapsed duration
    Time,
}

impl NumberKind {
    /// Classifies the built-in number format ids that render as dates or times.
    pub(crate) fn from_builtin_format(id: u16) -> Option<NumberKind> {
        match id {
            14..=17 => Some(NumberKind::Date),
            22 => Some(NumberKind::DateTime),
            18..=21 | 45..=47 => Some(NumberKind::Time),
            _ => None,
        }
    }

    /// Classifies a custom format code by scanning for date and time tokens
    /// outside of quoted literals, escapes and bracketed sections.
    pub(crate) fn from_format_code(code: &str) -> NumberKind {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut has_date = false;
        let mut has_time = false;
        for character in code.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '\\' | '_' if !is_literal => is_escaped = true,
                '"' => is_literal = !is_literal,
                _ if is_literal => (),
                '[' => is_bracket = true,
                ']' if is_bracket => is_bracket = false,
                // Elapsed-time sections such as [h] still mark a duration
                'h' | 'H' | 's' | 'S' if is_bracket => has_time = true,
                _ if is_bracket => (),
                'y' | 'Y' | 'd' | 'D' => has_date = true,
                'h' | 'H' | 's' | 'S' => has_time = true,
                _ => (),
            }
        }
        match (has_date, has_time) {
            (true, true) => NumberKind::DateTime,
            (true, false) => NumberKind::Date,
            (false, true) => NumberKind::Time,
            (false, false) => NumberKind::Plain,
        }
    }
}

/// Epoch used by a workbook for its date serials.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum DateSystem {
    #[default]
    Excel1900,
    Excel1904,
}

/// A single cell value as read from any supported source.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl CellValue {
    /// Interprets a raw number according to the format it was stored with.
    pub(crate) fn from_number(value: f64, kind: NumberKind, system: DateSystem) -> CellValue {
        match kind {
            NumberKind::Plain => CellValue::Number(value),
            NumberKind::Time => CellValue::Text(duration_text(value)),
            NumberKind::Date | NumberKind::DateTime => serial_to_datetime(value, system)
                .map(CellValue::Timestamp)
                .unwrap_or(CellValue::Number(value)),
        }
    }

    pub(crate) fn from_bool(value: bool) -> CellValue {
        CellValue::Text(if value { "true" } else { "false" }.to_owned())
    }

    /// True for absent cells and for text that is only whitespace.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// Same value with surrounding whitespace removed from text; blank text becomes `Empty`.
    pub fn trimmed(&self) -> CellValue {
        match self {
            CellValue::Text(text) if text.trim().is_empty() => CellValue::Empty,
            CellValue::Text(text) => CellValue::Text(text.trim().to_owned()),
            other => other.clone(),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => write!(f, "{}", *value as i64),
            CellValue::Number(value) => write!(f, "{}", value),
            CellValue::Timestamp(timestamp) => write!(f, "{}", timestamp.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_owned())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::Timestamp(value)
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).expect("NaiveDate Literal")
}

/// Converts a date serial to a timestamp, rounded to the millisecond.
/// Serials below 60 are shifted by a day to undo the phantom 1900-02-29.
pub(crate) fn serial_to_datetime(serial: f64, system: DateSystem) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let mut days = serial.trunc() as i64;
    let mut milliseconds = (serial.fract() * 86_400_000f64).round() as i64;
    if milliseconds >= 86_400_000 {
        days += 1;
        milliseconds -= 86_400_000;
    }
    let offset = match system {
        DateSystem::Excel1904 => 1462,
        DateSystem::Excel1900 if days < 60 => 1,
        DateSystem::Excel1900 => 0,
    };
    let date = epoch().checked_add_signed(Duration::try_days(days + offset)?)?;
    date.and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::try_milliseconds(milliseconds)?)
}

/// Converts a timestamp to a 1900-system serial suitable for writing.
pub(crate) fn datetime_to_serial(timestamp: &NaiveDateTime) -> f64 {
    let elapsed = timestamp.signed_duration_since(epoch().and_hms_opt(0, 0, 0).expect("Midnight Literal"));
    let serial = elapsed.num_milliseconds() as f64 / 86_400_000f64;
    if serial < 61.0 {
        serial - 1.0
    } else {
        serial
    }
}

/// Renders a day fraction as `HH:MM:SS`; hours keep counting past a day for durations.
pub(crate) fn duration_text(value: f64) -> String {
    let total = (value.abs() * 86_400f64).round() as i64;
    let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);
    let sign = if value < 0.0 && total > 0 { "-" } else { "" };
    format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datetime(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn custom_format_codes() {
        assert_eq!(NumberKind::from_format_code("General"), NumberKind::Plain);
        assert_eq!(NumberKind::from_format_code("#,##0.00"), NumberKind::Plain);
        assert_eq!(NumberKind::from_format_code("dd/mm/yyyy"), NumberKind::Date);
        assert_eq!(NumberKind::from_format_code("dd/mm/yyyy hh:mm:ss"), NumberKind::DateTime);
        assert_eq!(NumberKind::from_format_code("[h]:mm:ss"), NumberKind::Time);
        assert_eq!(NumberKind::from_format_code("[Red]0.00"), NumberKind::Plain);
        assert_eq!(NumberKind::from_format_code("0.0\" days\""), NumberKind::Plain);
    }

    #[test]
    fn builtin_format_ids() {
        assert_eq!(NumberKind::from_builtin_format(14), Some(NumberKind::Date));
        assert_eq!(NumberKind::from_builtin_format(22), Some(NumberKind::DateTime));
        assert_eq!(NumberKind::from_builtin_format(46), Some(NumberKind::Time));
        assert_eq!(NumberKind::from_builtin_format(2), None);
    }

    #[test]
    fn serial_conversions() {
        let system = DateSystem::Excel1900;
        assert_eq!(serial_to_datetime(1.0, system), Some(datetime("1900-01-01 00:00:00")));
        assert_eq!(serial_to_datetime(61.0, system), Some(datetime("1900-03-01 00:00:00")));
        assert_eq!(serial_to_datetime(45292.5, system), Some(datetime("2024-01-01 12:00:00")));
        assert_eq!(serial_to_datetime(0.0, DateSystem::Excel1904), Some(datetime("1904-01-01 00:00:00")));
        assert_eq!(serial_to_datetime(-1.0, system), None);

        assert_eq!(datetime_to_serial(&datetime("2024-01-01 12:00:00")), 45292.5);
        assert_eq!(datetime_to_serial(&datetime("1900-01-01 00:00:00")), 1.0);
    }

    #[test]
    fn number_interpretation() {
        let system = DateSystem::Excel1900;
        assert_eq!(CellValue::from_number(3.5, NumberKind::Plain, system), CellValue::Number(3.5));
        assert_eq!(
            CellValue::from_number(45292.25, NumberKind::DateTime, system),
            CellValue::Timestamp(datetime("2024-01-01 06:00:00"))
        );
        assert_eq!(CellValue::from_number(0.0625, NumberKind::Time, system), CellValue::from("01:30:00"));
        assert_eq!(CellValue::from_number(1.5, NumberKind::Time, system), CellValue::from("36:00:00"));
    }

    #[test]
    fn display_and_emptiness() {
        assert_eq!(CellValue::Number(12.0).to_string(), "12");
        assert_eq!(CellValue::Number(30.5).to_string(), "30.5");
        assert_eq!(CellValue::Timestamp(datetime("2024-05-01 08:15:00")).to_string(), "2024-05-01 08:15:00");
        assert!(CellValue::from("   ").is_empty());
        assert!(!CellValue::Number(0.0).is_empty());
        assert_eq!(CellValue::from("  x ").trimmed(), CellValue::from("x"));
        assert_eq!(CellValue::from(" ").trimmed(), CellValue::Empty);
    }
}
