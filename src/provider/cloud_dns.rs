use async_trait::async_trait;
use jiff::Timestamp;
use rootcause::prelude::ResultExt;
use reqwest::Url;
use rootcause::{Report, report};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ChangeReceipt, ChangeSet, ChangeStatus, DnsProvider, DnsRecordType, ManagedZone, ProjectId,
    RecordSet,
};

const CLOUD_DNS_API: &str = "https://dns.googleapis.com/dns/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where the OAuth bearer token for the Cloud DNS API comes from.
#[derive(Debug, Clone)]
pub enum AccessToken {
    Static(String),
    /// Ask the instance metadata server for the default service account's token.
    MetadataServer,
}

pub struct CloudDnsProvider {
    token: AccessToken,
    base_url: String,
    client: reqwest::Client,
}

impl CloudDnsProvider {
    pub fn new(token: AccessToken) -> Self {
        Self::with_base_url(token, CLOUD_DNS_API)
    }

    pub fn with_base_url(token: AccessToken, base_url: impl Into<String>) -> Self {
        Self {
            token,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Builds `{base}/projects/{project}/managedZones/{zone}/{resource}`. Each
    /// identifier is pushed as one percent-encoded segment, so it can never
    /// climb out of the project or add a query.
    fn zone_url(
        &self,
        project: &ProjectId,
        zone: &ManagedZone,
        resource: &str,
    ) -> Result<Url, Report> {
        let mut url = Url::parse(&self.base_url)
            .context("Parsing Cloud DNS base URL")
            .attach(format!("base_url: '{}'", self.base_url))?;
        match url.path_segments_mut() {
            Ok(mut segments) => {
                segments.pop_if_empty().extend([
                    "projects",
                    project.0.as_str(),
                    "managedZones",
                    zone.0.as_str(),
                    resource,
                ]);
            }
            Err(()) => {
                return Err(report!("Cloud DNS base URL cannot carry a path")
                    .attach(format!("base_url: '{}'", self.base_url)));
            }
        }
        Ok(url)
    }

    async fn bearer_token(&self) -> Result<String, Report> {
        match &self.token {
            AccessToken::Static(token) => Ok(token.clone()),
            AccessToken::MetadataServer => {
                let response = self
                    .client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .context("Fetching access token from metadata server")?;

                if !response.status().is_success() {
                    return Err(
                        failure_report("Metadata server refused token request", response).await,
                    );
                }

                let token = response
                    .json::<MetadataToken>()
                    .await
                    .context("Parsing metadata server token response")?;
                Ok(token.access_token)
            }
        }
    }
}

#[async_trait]
impl DnsProvider for CloudDnsProvider {
    async fn list_record_sets(
        &self,
        project: &ProjectId,
        zone: &ManagedZone,
    ) -> Result<Vec<RecordSet>, Report> {
        let token = self.bearer_token().await?;
        let url = self.zone_url(project, zone, "rrsets")?;

        let mut record_sets = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(url.clone()).bearer_auth(&token);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let response = request
                .send()
                .await
                .context("Listing record sets from Cloud DNS")
                .attach(format!("zone: '{zone}'"))?;

            if !response.status().is_success() {
                return Err(
                    failure_report("Failed to list record sets from Cloud DNS", response)
                        .await
                        .attach(format!("zone: '{zone}'")),
                );
            }

            let page = response
                .json::<RecordSetsListResponse>()
                .await
                .context("Parsing Cloud DNS record set list")
                .attach(format!("zone: '{zone}'"))?;

            record_sets.extend(page.rrsets.into_iter().filter_map(|it| it.into()));

            let Some(next) = page.next_page_token.filter(|it| !it.is_empty()) else {
                break;
            };
            if page_token.as_ref() == Some(&next) {
                warn!(zone = %zone, page_token = %next, "Cloud DNS repeated a page token");
                break;
            }
            page_token = Some(next);
        }

        Ok(record_sets)
    }

    async fn create_change(
        &self,
        project: &ProjectId,
        zone: &ManagedZone,
        change: &ChangeSet,
    ) -> Result<ChangeReceipt, Report> {
        let token = self.bearer_token().await?;
        let url = self.zone_url(project, zone, "changes")?;
        let body = WireChange {
            additions: change.additions.iter().map(WireRecordSet::from).collect(),
            deletions: change.deletions.iter().map(WireRecordSet::from).collect(),
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .context("Submitting change to Cloud DNS")
            .attach(format!("zone: '{zone}'"))?;

        if !response.status().is_success() {
            return Err(failure_report("Cloud DNS rejected change", response)
                .await
                .attach(format!("zone: '{zone}'")));
        }

        let created = response
            .json::<ChangeResponse>()
            .await
            .context("Parsing Cloud DNS change response")
            .attach(format!("zone: '{zone}'"))?;

        Ok(ChangeReceipt {
            id: created.id,
            status: ChangeStatus::from(created.status.as_str()),
            applied_additions: created.additions.len(),
            start_time: created.start_time,
        })
    }
}

async fn failure_report(message: &'static str, response: reqwest::Response) -> Report {
    let status = response.status();
    report!("{}", message)
        .attach(format!("status: {status}"))
        .attach(format!(
            "response: {:?}",
            response
                .text()
                .await
                .unwrap_or("<Response reading failed>".to_string())
        ))
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordSetsListResponse {
    #[serde(default)]
    rrsets: Vec<WireRecordSet>,
    next_page_token: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct WireRecordSet {
    pub(crate) name: String,
    pub(crate) r#type: String,
    #[serde(default)]
    pub(crate) ttl: u32,
    #[serde(default)]
    pub(crate) rrdatas: Vec<String>,
}

impl From<&RecordSet> for WireRecordSet {
    fn from(record: &RecordSet) -> Self {
        Self {
            name: record.name.clone(),
            r#type: record.typ.to_string(),
            ttl: record.ttl,
            rrdatas: record.rrdatas.clone(),
        }
    }
}

impl From<WireRecordSet> for Option<RecordSet> {
    fn from(record: WireRecordSet) -> Self {
        let typ = match record.r#type.as_str() {
            "A" => DnsRecordType::A,
            "AAAA" => DnsRecordType::AAAA,
            _ => {
                debug!(
                    typ = %record.r#type,
                    name = %record.name,
                    "Skipping unsupported record type"
                );
                return None;
            }
        };
        Some(RecordSet {
            name: record.name,
            typ,
            ttl: record.ttl,
            rrdatas: record.rrdatas,
        })
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct WireChange {
    pub(crate) additions: Vec<WireRecordSet>,
    pub(crate) deletions: Vec<WireRecordSet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    additions: Vec<WireRecordSet>,
    start_time: Option<Timestamp>,
}
