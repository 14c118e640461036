use chrono::{Datelike, NaiveDate, NaiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthWindow {
    pub fn start_timestamp(&self) -> i64 {
        midnight_utc(self.start)
    }

    pub fn end_timestamp(&self) -> i64 {
        midnight_utc(self.end)
    }

    /// A window can only be marked complete once nothing new can land in it.
    pub fn is_closed(&self, now: NaiveDateTime) -> bool {
        self.end.and_hms_opt(0, 0, 0).is_some_and(|end| end <= now)
    }

    pub fn key(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}

/// First day of the month `months` months after `date`'s month.
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let month0 = date.month0() + months;
    let year = date.year() + (month0 / 12) as i32;
    let month = month0 % 12 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

pub fn month_windows(start: NaiveDate, now: NaiveDateTime) -> Vec<MonthWindow> {
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor.and_hms_opt(0, 0, 0).is_some_and(|c| c < now) {
        let next = add_months(cursor, 1);
        if next <= cursor {
            break;
        }
        out.push(MonthWindow {
            start: cursor,
            end: next,
        });
        cursor = next;
    }
    out
}

fn midnight_utc(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}
