use std::net::Ipv4Addr;

use rootcause::Report;
use rootcause::prelude::ResultExt;
use tracing::{info, warn};

use crate::provider::{ChangeSet, DnsProvider, DnsRecordType, ManagedZone, ProjectId, RecordSet};

/// TTL for records that did not exist before.
pub const DEFAULT_TTL: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record already pointed at the address, nothing was submitted.
    Unchanged,
    Created,
    Updated { previous: Vec<String> },
}

/// Works out which record sets have to be added and removed so that `domain`
/// has exactly one A record holding `ip`.
///
/// Only the first A record set named `domain` is considered. Later duplicates
/// are reported and left alone; the provider does not normally allow them.
pub fn plan_change(
    existing: &[RecordSet],
    domain: &str,
    ip: Ipv4Addr,
) -> (ChangeSet, ReconcileOutcome) {
    let target = ip.to_string();
    let mut matches = existing
        .iter()
        .filter(|it| it.typ == DnsRecordType::A && it.name == domain);
    let current = matches.next();

    let duplicates = matches.count();
    if duplicates > 0 {
        warn!(
            domain = %domain,
            duplicates,
            "found more than one A record set for domain, using the first"
        );
    }

    let mut change = ChangeSet::default();
    let outcome = match current {
        Some(record) if record.rrdatas == [target.as_str()] => {
            return (change, ReconcileOutcome::Unchanged);
        }
        Some(record) => {
            info!(
                domain = %record.name,
                values = ?record.rrdatas,
                ttl = record.ttl,
                "found stale record"
            );
            change.deletions.push(record.clone());
            ReconcileOutcome::Updated {
                previous: record.rrdatas.clone(),
            }
        }
        None => ReconcileOutcome::Created,
    };

    change.additions.push(RecordSet {
        name: domain.to_string(),
        typ: DnsRecordType::A,
        ttl: current.map_or(DEFAULT_TTL, |it| it.ttl),
        rrdatas: vec![target],
    });

    (change, outcome)
}

/// Points the A record for `domain` in `zone` at `ip`, touching the provider
/// only when something actually differs. Not guarded against concurrent
/// updates of the same name; the provider decides which change lands last.
pub async fn reconcile(
    provider: &(dyn DnsProvider + Send + Sync),
    project: &ProjectId,
    zone: &ManagedZone,
    domain: &str,
    ip: Ipv4Addr,
) -> Result<ReconcileOutcome, Report> {
    let existing = provider
        .list_record_sets(project, zone)
        .await
        .context("Listing record sets")
        .attach(format!("zone: '{zone}'"))?;

    let (change, outcome) = plan_change(&existing, domain, ip);
    if change.is_empty() {
        info!(domain = %domain, zone = %zone, "no changes to be made");
        return Ok(outcome);
    }

    let receipt = provider
        .create_change(project, zone, &change)
        .await
        .context("Creating change")
        .attach(format!("zone: '{zone}'"))
        .attach(format!("domain: '{domain}'"))?;

    info!(
        zone = %zone,
        change_id = %receipt.id,
        status = %receipt.status,
        additions = receipt.applied_additions,
        deletions = change.deletions.len(),
        started = ?receipt.start_time,
        "submitted DNS change"
    );

    Ok(outcome)
}
