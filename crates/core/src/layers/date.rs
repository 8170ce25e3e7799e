//! Date layer support: bucket files by a timestamp field into a
//! year/month/day hierarchy with zero-padded keys.

use crate::error::{FsError, FsResult};
use crate::types::FileMeta;
use chrono::{DateTime, Datelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Mtime,
    Ctime,
    Atime,
}

impl DateField {
    pub fn parse(s: &str) -> FsResult<Self> {
        match s {
            "mtime" => Ok(DateField::Mtime),
            "ctime" => Ok(DateField::Ctime),
            "atime" => Ok(DateField::Atime),
            other => Err(FsError::InvalidInput(format!("unknown date field '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DateField::Mtime => "mtime",
            DateField::Ctime => "ctime",
            DateField::Atime => "atime",
        }
    }

    pub fn timestamp(&self, file: &dyn FileMeta) -> i64 {
        match self {
            DateField::Mtime => file.mtime(),
            DateField::Ctime => file.ctime(),
            DateField::Atime => file.atime(),
        }
    }
}

/// `(YYYY, MM, DD)` keys for a UTC timestamp. Timestamps at or before the
/// epoch (and anything chrono cannot represent) land in the sentinel bucket
/// `1970/01/01`.
pub fn date_keys(timestamp: i64) -> (String, String, String) {
    if timestamp <= 0 {
        return ("1970".into(), "01".into(), "01".into());
    }
    match DateTime::<Utc>::from_timestamp(timestamp, 0) {
        Some(dt) => (
            format!("{:04}", dt.year()),
            format!("{:02}", dt.month()),
            format!("{:02}", dt.day()),
        ),
        None => ("1970".into(), "01".into(), "01".into()),
    }
}
