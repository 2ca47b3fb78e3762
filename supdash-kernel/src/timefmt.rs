//! Rendu des instants absolus en heure murale locale `YYYY-MM-DD HH:MM:SS`.

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Conversion instant UTC → heure locale, branchable (offset fixe, tz database...)
pub trait LocalClock: Send + Sync {
    /// Offset local en vigueur à cet instant
    fn offset_at(&self, instant: OffsetDateTime) -> UtcOffset;

    fn render(&self, instant: OffsetDateTime) -> String {
        let local = instant.to_offset(self.offset_at(instant));
        local
            .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
            .unwrap_or_default()
    }
}

/// Offset fixe (Asia/Tokyo n'a pas d'heure d'été : +09:00 suffit)
#[derive(Debug, Clone, Copy)]
pub struct FixedOffsetClock {
    offset: UtcOffset,
}

impl FixedOffsetClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(UtcOffset::UTC)
    }

    /// Accepte "+09:00", "-05:30", "Z" ou "UTC"
    pub fn parse(text: &str) -> Result<Self, time::error::Parse> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("utc") || text == "Z" {
            return Ok(Self::utc());
        }
        let offset = UtcOffset::parse(text, format_description!("[offset_hour sign:mandatory]:[offset_minute]"))?;
        Ok(Self::new(offset))
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }
}

impl LocalClock for FixedOffsetClock {
    fn offset_at(&self, _instant: OffsetDateTime) -> UtcOffset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokyo_rendering() {
        let clock = FixedOffsetClock::parse("+09:00").unwrap();
        let epoch = OffsetDateTime::from_unix_timestamp(0).unwrap();
        assert_eq!(clock.render(epoch), "1970-01-01 09:00:00");

        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(clock.render(t), "2023-11-15 07:13:20");
    }

    #[test]
    fn test_negative_offset_and_utc() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(FixedOffsetClock::utc().render(t), "2023-11-14 22:13:20");
        assert_eq!(FixedOffsetClock::parse("-05:30").unwrap().render(t), "2023-11-14 16:43:20");
        assert_eq!(FixedOffsetClock::parse("Z").unwrap().offset(), UtcOffset::UTC);
    }

    #[test]
    fn test_invalid_offset() {
        assert!(FixedOffsetClock::parse("Asia/Tokyo").is_err());
        assert!(FixedOffsetClock::parse("9").is_err());
    }
}
