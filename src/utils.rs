use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use serde::Serialize;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Start of the calendar day containing `now`, where days are counted in `offset`.
pub fn start_of_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|start| start.with_timezone(&Utc))
        // unreachable for fixed offsets
        .unwrap_or(now - Duration::hours(24))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    /// Lenient parsing of `limit`/`offset` query values: garbage falls back to defaults.
    pub fn from_query(limit: Option<&str>, offset: Option<&str>) -> Self {
        let limit = limit
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let offset = offset
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .max(0);
        Self { limit, offset }
    }

    pub fn info(&self, total: u64) -> PageInfo {
        let total = total as i64;
        PageInfo {
            total,
            page: self.offset / self.limit + 1,
            limit: self.limit,
            has_more: self.offset.saturating_add(self.limit) < total,
        }
    }

    pub fn window<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub has_more: bool,
}

/// Escapes `%`, `_` and `\` so user input matches literally inside a LIKE pattern.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_starts_at_local_midnight() {
        let eat = FixedOffset::east_opt(3 * 3600).unwrap();
        // 22:30 UTC is already 01:30 the next day in Nairobi.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap();
        let start = start_of_day(now, eat);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 21, 0, 0).unwrap());

        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(
            start_of_day(now, utc),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn page_request_clamps_and_defaults() {
        assert_eq!(PageRequest::from_query(None, None), PageRequest::default());
        assert_eq!(
            PageRequest::from_query(Some("500"), Some("-3")),
            PageRequest {
                limit: 100,
                offset: 0
            }
        );
        assert_eq!(
            PageRequest::from_query(Some("abc"), Some("40")),
            PageRequest {
                limit: 20,
                offset: 40
            }
        );
        assert_eq!(PageRequest::from_query(Some("0"), None).limit, 1);
    }

    #[test]
    fn page_info_reports_more_pages() {
        let page = PageRequest {
            limit: 10,
            offset: 20,
        };
        let info = page.info(31);
        assert_eq!(info.page, 3);
        assert!(info.has_more);
        assert!(!page.info(30).has_more);
    }

    #[test]
    fn huge_offset_does_not_overflow() {
        let page = PageRequest::from_query(Some("100"), Some("9223372036854775807"));
        assert_eq!(page.offset, i64::MAX);
        let info = page.info(5);
        assert!(!info.has_more);
        assert!(page.window(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("KBZ"), "KBZ");
    }
}
