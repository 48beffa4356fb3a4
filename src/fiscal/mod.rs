//! Fiscal calendar codes.
//!
//! The retailer's fiscal year `FYyy` starts on October 1 of calendar year
//! `20yy - 1`. Quarters are labelled `FY<yy>Q<q>` and weeks `FY<yy>W<ww>`.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use thiserror::Error;

/// Weeks in a regular fiscal year. Week 53 decodes but projection wraps after 52.
pub const WEEKS_PER_YEAR: u32 = 52;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FiscalCodeError {
    #[error("`{0}` is not a fiscal code of the form FY<yy>{1}<n>")]
    Format(String, char),
    #[error("`{0}` is out of range")]
    Range(String),
}

/// Parse the shared `FY<yy><tag><n>` shape, returning `(yy, n)`.
fn parse_code(code: &str, tag: char) -> Result<(u32, u32), FiscalCodeError> {
    let format_err = || FiscalCodeError::Format(code.to_string(), tag);
    let trimmed = code.trim();
    let rest = trimmed
        .strip_prefix("FY")
        .or_else(|| trimmed.strip_prefix("fy"))
        .ok_or_else(format_err)?;

    let (year, number) = rest
        .split_once(|c: char| c.eq_ignore_ascii_case(&tag))
        .ok_or_else(format_err)?;

    if year.len() != 2 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_err());
    }
    if number.is_empty() || number.len() > 2 || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_err());
    }

    let year = year.parse().map_err(|_| format_err())?;
    let number = number.parse().map_err(|_| format_err())?;
    Ok((year, number))
}

/// Calendar year in which fiscal year `yy` begins.
fn start_calendar_year(fiscal_year: u32) -> i32 {
    2000 + fiscal_year as i32 - 1
}

/// A fiscal quarter such as `FY23Q4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiscalQuarter {
    pub year: u32,
    pub quarter: u32,
}

impl FiscalQuarter {
    /// First day of the quarter. Q1 starts in October of the previous calendar year.
    pub fn start_date(&self) -> Option<NaiveDate> {
        let (year, month) = match self.quarter {
            1 => (start_calendar_year(self.year), 10),
            2 => (start_calendar_year(self.year) + 1, 1),
            3 => (start_calendar_year(self.year) + 1, 4),
            4 => (start_calendar_year(self.year) + 1, 7),
            _ => return None,
        };
        NaiveDate::from_ymd_opt(year, month, 1)
    }

    /// The quarter containing `week`: weeks 1-13 are Q1, 14-26 Q2, 27-39 Q3, the rest Q4.
    pub fn containing(week: FiscalWeek) -> Self {
        let quarter = ((week.week.saturating_sub(1)) / 13 + 1).min(4);
        Self {
            year: week.year,
            quarter,
        }
    }
}

impl FromStr for FiscalQuarter {
    type Err = FiscalCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, quarter) = parse_code(s, 'Q')?;
        if !(1..=4).contains(&quarter) {
            return Err(FiscalCodeError::Range(s.to_string()));
        }
        Ok(Self { year, quarter })
    }
}

impl fmt::Display for FiscalQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FY{:02}Q{}", self.year % 100, self.quarter)
    }
}

/// A fiscal week such as `FY23W01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiscalWeek {
    pub year: u32,
    pub week: u32,
}

impl FiscalWeek {
    /// October 1 of the fiscal year's start plus `week - 1` weeks.
    pub fn start_date(&self) -> Option<NaiveDate> {
        let year_start = NaiveDate::from_ymd_opt(start_calendar_year(self.year), 10, 1)?;
        year_start.checked_add_days(Days::new(u64::from(self.week - 1) * 7))
    }

    /// The following week, rolling into week 1 of the next fiscal year after week 52.
    pub fn next(&self) -> Self {
        if self.week >= WEEKS_PER_YEAR {
            Self {
                year: (self.year + 1) % 100,
                week: 1,
            }
        } else {
            Self {
                year: self.year,
                week: self.week + 1,
            }
        }
    }

    /// The `n`-th week after this one.
    pub fn advance(&self, n: usize) -> Self {
        (0..n).fold(*self, |week, _| week.next())
    }
}

impl FromStr for FiscalWeek {
    type Err = FiscalCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, week) = parse_code(s, 'W')?;
        if !(1..=WEEKS_PER_YEAR + 1).contains(&week) {
            return Err(FiscalCodeError::Range(s.to_string()));
        }
        Ok(Self { year, week })
    }
}

impl fmt::Display for FiscalWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FY{:02}W{:02}", self.year % 100, self.week)
    }
}

/// Decode a quarter code straight to its start date.
pub fn quarter_start(code: &str) -> Result<NaiveDate, FiscalCodeError> {
    let quarter: FiscalQuarter = code.parse()?;
    quarter
        .start_date()
        .ok_or_else(|| FiscalCodeError::Range(code.to_string()))
}

/// Decode a week code straight to its start date.
pub fn week_start(code: &str) -> Result<NaiveDate, FiscalCodeError> {
    let week: FiscalWeek = code.parse()?;
    week.start_date()
        .ok_or_else(|| FiscalCodeError::Range(code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_quarter_start_dates() {
        assert_eq!(quarter_start("FY23Q1").unwrap(), date(2022, 10, 1));
        assert_eq!(quarter_start("FY23Q2").unwrap(), date(2023, 1, 1));
        assert_eq!(quarter_start("FY23Q3").unwrap(), date(2023, 4, 1));
        assert_eq!(quarter_start("FY23Q4").unwrap(), date(2023, 7, 1));
    }

    #[test]
    fn test_week_start_dates() {
        assert_eq!(week_start("FY23W01").unwrap(), date(2022, 10, 1));
        assert_eq!(week_start("FY23W02").unwrap(), date(2022, 10, 8));
        assert_eq!(week_start("FY24W52").unwrap(), date(2024, 9, 22));
    }

    #[test]
    fn test_every_two_digit_week_follows_formula() {
        for yy in 0..100u32 {
            for ww in 1..=53u32 {
                let code = format!("FY{yy:02}W{ww:02}");
                let expected = date(2000 + yy as i32 - 1, 10, 1)
                    .checked_add_days(Days::new(u64::from(ww - 1) * 7))
                    .unwrap();
                assert_eq!(week_start(&code).unwrap(), expected, "{code}");
            }
        }
    }

    #[test]
    fn test_malformed_codes_rejected() {
        for code in ["", "FY23", "FY23Q5", "FY23Q0", "FYxxQ1", "23Q1", "FY2023Q1", "FY23Q1x"] {
            assert!(quarter_start(code).is_err(), "{code}");
        }
        for code in ["FY23W00", "FY23W54", "FY23W", "FY23Q01", "FY23W123"] {
            assert!(week_start(code).is_err(), "{code}");
        }
    }

    #[test]
    fn test_week_projection_wraps_after_52() {
        let week: FiscalWeek = "FY23W51".parse().unwrap();
        assert_eq!(week.next().to_string(), "FY23W52");
        assert_eq!(week.advance(2).to_string(), "FY24W01");
        assert_eq!(week.advance(4).to_string(), "FY24W03");

        let week53: FiscalWeek = "FY23W53".parse().unwrap();
        assert_eq!(week53.next().to_string(), "FY24W01");
    }

    #[test]
    fn test_quarter_containing_week() {
        let q = |code: &str| FiscalQuarter::containing(code.parse().unwrap()).to_string();
        assert_eq!(q("FY24W01"), "FY24Q1");
        assert_eq!(q("FY24W13"), "FY24Q1");
        assert_eq!(q("FY24W14"), "FY24Q2");
        assert_eq!(q("FY24W39"), "FY24Q3");
        assert_eq!(q("FY24W52"), "FY24Q4");
        assert_eq!(q("FY24W53"), "FY24Q4");
    }
}
