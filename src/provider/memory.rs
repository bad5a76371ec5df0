use std::sync::Mutex;

use async_trait::async_trait;
use rootcause::{Report, bail};

use super::{
    ChangeReceipt, ChangeSet, ChangeStatus, DnsProvider, DnsRecordType, ManagedZone, ProjectId,
    RecordSet,
};

/// A single managed zone held in memory. Changes are applied immediately and
/// recorded so tests can assert on what was submitted.
#[derive(Default)]
pub struct InMemoryZone {
    records: Mutex<Vec<RecordSet>>,
    submitted: Mutex<Vec<ChangeSet>>,
    list_calls: Mutex<usize>,
    fail_list: bool,
    fail_change: bool,
}

impl InMemoryZone {
    pub fn with_records(records: Vec<RecordSet>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_change(mut self) -> Self {
        self.fail_change = true;
        self
    }

    pub fn records(&self) -> Vec<RecordSet> {
        self.records.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<ChangeSet> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }
}

pub fn a_record(name: &str, ip: &str, ttl: u32) -> RecordSet {
    RecordSet {
        name: name.to_string(),
        typ: DnsRecordType::A,
        ttl,
        rrdatas: vec![ip.to_string()],
    }
}

#[async_trait]
impl DnsProvider for InMemoryZone {
    async fn list_record_sets(
        &self,
        _project: &ProjectId,
        zone: &ManagedZone,
    ) -> Result<Vec<RecordSet>, Report> {
        *self.list_calls.lock().unwrap() += 1;
        if self.fail_list {
            bail!("zone '{zone}' is not readable");
        }
        Ok(self.records())
    }

    async fn create_change(
        &self,
        _project: &ProjectId,
        zone: &ManagedZone,
        change: &ChangeSet,
    ) -> Result<ChangeReceipt, Report> {
        if self.fail_change {
            bail!("quota exceeded for zone '{zone}'");
        }

        let mut records = self.records.lock().unwrap();
        if let Some(missing) = change.deletions.iter().find(|it| !records.contains(it)) {
            bail!("record set {} {} does not match", missing.name, missing.typ);
        }
        records.retain(|it| !change.deletions.contains(it));
        records.extend(change.additions.iter().cloned());

        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(change.clone());

        Ok(ChangeReceipt {
            id: submitted.len().to_string(),
            status: ChangeStatus::Done,
            applied_additions: change.additions.len(),
            start_time: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unmatched_deletion_rejects_the_whole_change() {
        let zone = InMemoryZone::with_records(vec![
            a_record("a.example.com.", "1.1.1.1", 300),
            a_record("b.example.com.", "2.2.2.2", 300),
        ]);
        let before = zone.records();

        let result = zone
            .create_change(
                &ProjectId("proj".to_string()),
                &ManagedZone("zone".to_string()),
                &ChangeSet {
                    additions: vec![a_record("c.example.com.", "3.3.3.3", 300)],
                    deletions: vec![
                        a_record("a.example.com.", "1.1.1.1", 300),
                        a_record("b.example.com.", "9.9.9.9", 300),
                    ],
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(zone.records(), before);
        assert!(zone.submitted().is_empty());
    }
}
