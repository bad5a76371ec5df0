use std::str::FromStr;

use async_trait::async_trait;
use derive_more::Display;
use jiff::Timestamp;
use rootcause::{Report, bail};

pub mod cloud_dns;
#[cfg(test)]
pub mod memory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DnsRecordType {
    A,
    #[allow(clippy::upper_case_acronyms)]
    AAAA,
}

/// Cloud project that owns the managed zones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct ProjectId(pub String);

/// Name or numeric id of a managed zone inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct ManagedZone(pub String);

impl FromStr for ManagedZone {
    type Err = Report;

    /// Accepts managed zone names and numeric ids: lowercase letters, digits
    /// and dashes, at most 63 characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 63 {
            bail!("zone '{}' must be between 1 and 63 characters", s);
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            bail!("zone '{}' contains invalid character {:?}", s, bad);
        }
        Ok(Self(s.to_string()))
    }
}

/// A single resource record set as the provider stores it. Names are fully
/// qualified and end with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordSet {
    pub name: String,
    pub typ: DnsRecordType,
    pub ttl: u32,
    pub rrdatas: Vec<String>,
}

/// Additions and deletions that the provider applies atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub additions: Vec<RecordSet>,
    pub deletions: Vec<RecordSet>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ChangeStatus {
    #[display("pending")]
    Pending,
    #[display("done")]
    Done,
    #[display("{_0}")]
    Other(String),
}

impl From<&str> for ChangeStatus {
    fn from(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "done" => Self::Done,
            other => Self::Other(other.to_string()),
        }
    }
}

/// What the provider reported back after accepting a change. Propagation may
/// still be in progress when the status is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReceipt {
    pub id: String,
    pub status: ChangeStatus,
    pub applied_additions: usize,
    pub start_time: Option<Timestamp>,
}

#[async_trait]
pub trait DnsProvider {
    async fn list_record_sets(
        &self,
        project: &ProjectId,
        zone: &ManagedZone,
    ) -> Result<Vec<RecordSet>, Report>;

    async fn create_change(
        &self,
        project: &ProjectId,
        zone: &ManagedZone,
        change: &ChangeSet,
    ) -> Result<ChangeReceipt, Report>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_names_and_ids_parse() {
        assert_eq!(
            "home-zone".parse::<ManagedZone>().unwrap(),
            ManagedZone("home-zone".to_string())
        );
        assert!("4207819466372551234".parse::<ManagedZone>().is_ok());
    }

    #[test]
    fn zone_rejects_path_and_query_characters() {
        let too_long = "a".repeat(64);
        for zone in [
            "",
            "..",
            "../../other/managedZones/z",
            "zone?x=1",
            "zone#frag",
            "Zone",
            "zone%2F",
            too_long.as_str(),
        ] {
            assert!(zone.parse::<ManagedZone>().is_err(), "{zone:?} accepted");
        }
    }
}
