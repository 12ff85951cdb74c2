//! Search filters over the catalog relations.
//!
//! Every set field adds one equality condition; conditions are combined with
//! `AND`. Results are ordered most recent first.

use crate::job::{JobKind, JobStatus};
use crate::module::BackupMode;
use rusqlite::types::ToSql;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub client_name: Option<String>,
    pub module_type: Option<String>,
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub mode: Option<BackupMode>,
    pub uuid: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageFilter {
    pub client_name: Option<String>,
    pub module_type: Option<String>,
    pub repo_name: Option<String>,
    pub uuid: Option<Uuid>,
}

/// Window over a result set. No limit returns everything past `offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// Values bound to `LIMIT ? OFFSET ?`; SQLite reads a negative limit as
    /// unbounded.
    pub(crate) fn bounds(&self) -> (i64, i64) {
        (
            self.limit.map(i64::from).unwrap_or(-1),
            i64::from(self.offset),
        )
    }
}

/// `WHERE` clause under construction.
#[derive(Default)]
pub(crate) struct Conditions {
    sets: Vec<&'static str>,
    values: Vec<Box<dyn ToSql>>,
}

impl Conditions {
    fn push<T: ToSql + 'static>(&mut self, condition: &'static str, value: Option<T>) {
        if let Some(value) = value {
            self.sets.push(condition);
            self.values.push(Box::new(value));
        }
    }

    pub(crate) fn sql(&self) -> String {
        if self.sets.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sets.join(" AND "))
        }
    }

    /// Bound values, followed by `extra` (pagination, ...).
    pub(crate) fn params<'a>(&'a self, extra: &'a [&'a dyn ToSql]) -> Vec<&'a dyn ToSql> {
        self.values
            .iter()
            .map(|v| v.as_ref())
            .chain(extra.iter().copied())
            .collect()
    }
}

impl JobFilter {
    pub(crate) fn conditions(&self) -> Conditions {
        let mut c = Conditions::default();
        c.push("client_name = ?", self.client_name.clone());
        c.push("module_type = ?", self.module_type.clone());
        c.push("status = ?", self.status.map(|s| s.as_str()));
        c.push("kind = ?", self.kind.map(|k| k.as_str()));
        c.push("mode = ?", self.mode.map(|m| m.as_str()));
        c.push("uuid = ?", self.uuid.map(|u| u.to_string()));
        c
    }
}

impl ImageFilter {
    pub(crate) fn conditions(&self) -> Conditions {
        let mut c = Conditions::default();
        c.push("client_name = ?", self.client_name.clone());
        c.push("module_type = ?", self.module_type.clone());
        c.push("repo_name = ?", self.repo_name.clone());
        c.push("uuid = ?", self.uuid.map(|u| u.to_string()));
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_has_no_clause() {
        let c = JobFilter::default().conditions();
        assert_eq!(c.sql(), "");
        assert!(c.params(&[]).is_empty());
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let filter = JobFilter {
            client_name: Some("c1".into()),
            status: Some(JobStatus::Success),
            mode: Some(BackupMode::Full),
            ..JobFilter::default()
        };
        let c = filter.conditions();
        assert_eq!(c.sql(), " WHERE client_name = ? AND status = ? AND mode = ?");

        let (limit, offset) = Page::new(10, 20).bounds();
        assert_eq!((limit, offset), (10, 20));
        assert_eq!(c.params(&[&limit, &offset]).len(), 5);
    }

    #[test]
    fn test_unbounded_page() {
        assert_eq!(Page::default().bounds(), (-1, 0));
    }
}
