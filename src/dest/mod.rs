pub mod timeline;
pub mod tree;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DstError {
    #[error("downstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("downstream object not found: {0}")]
    NotFound(String),
    #[error("downstream rejected the operation: {0}")]
    Rejected(String),
}

impl DstError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DstError::Http(_))
    }
}

/// A validity as returned by downstream queries. `to` is an inclusive
/// instant (the store subtracts one day on read compared to what was
/// written); `None` means open-ended. The reader in [`timeline`] is the
/// single place that converts this back onto the half-open axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DstValidity {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

/// A validity as accepted by downstream mutations, with `to` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WriteValidity {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DstClass {
    pub uuid: Uuid,
    pub user_key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DstAddress {
    pub uuid: Uuid,
    pub value: String,
    pub type_user_key: String,
}

/// One validity row of a unit's downstream timeline, including the
/// auxiliary administrative attributes that updates must carry forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DstUnitValidity {
    pub validity: DstValidity,
    pub name: String,
    pub user_key: String,
    pub level: Option<String>,
    pub parent: Option<Uuid>,
    pub hierarchy_class: Option<Uuid>,
    pub time_planning: Option<Uuid>,
}

/// The current snapshot of one unit, used to assemble the downstream tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DstUnitRecord {
    pub uuid: Uuid,
    pub parent_uuid: Option<Uuid>,
    pub user_key: String,
    pub name: String,
    pub level: Option<String>,
    pub hierarchy_class: Option<Uuid>,
    #[serde(default)]
    pub addresses: Vec<DstAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DstEngagementValidity {
    pub uuid: Uuid,
    pub validity: DstValidity,
    pub job_function_user_key: String,
    pub extension_name: String,
    pub org_unit: Uuid,
    pub engagement_type: Uuid,
    pub primary: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DstLeaveValidity {
    pub uuid: Uuid,
    pub validity: DstValidity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DstPersonValidity {
    pub uuid: Uuid,
    pub validity: DstValidity,
    pub given_name: String,
    pub surname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitCreateInput {
    pub uuid: Uuid,
    pub validity: WriteValidity,
    pub name: String,
    pub user_key: String,
    pub parent: Option<Uuid>,
    pub unit_type: Uuid,
    pub unit_level: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitUpdateInput {
    pub uuid: Uuid,
    pub validity: WriteValidity,
    pub name: String,
    pub user_key: String,
    pub parent: Option<Uuid>,
    pub unit_type: Uuid,
    pub unit_level: Option<Uuid>,
    pub hierarchy_class: Option<Uuid>,
    pub time_planning: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitTerminateInput {
    pub uuid: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngagementCreateInput {
    pub person: Uuid,
    pub user_key: String,
    pub validity: WriteValidity,
    pub org_unit: Uuid,
    pub engagement_type: Uuid,
    pub job_function: Uuid,
    pub extension_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngagementUpdateInput {
    pub uuid: Uuid,
    pub person: Uuid,
    pub user_key: String,
    pub validity: WriteValidity,
    pub org_unit: Uuid,
    pub engagement_type: Uuid,
    pub job_function: Uuid,
    pub extension_name: String,
    pub primary: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngagementTerminateInput {
    pub uuid: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressCreateInput {
    pub org_unit: Uuid,
    pub value: String,
    pub address_type: Uuid,
    pub validity: WriteValidity,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressUpdateInput {
    pub uuid: Uuid,
    pub value: String,
    pub validity: WriteValidity,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveCreateInput {
    pub person: Uuid,
    pub engagement: Uuid,
    pub leave_type: Uuid,
    pub validity: WriteValidity,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveUpdateInput {
    pub uuid: Uuid,
    pub validity: WriteValidity,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonCreateInput {
    pub cpr: String,
    pub given_name: String,
    pub surname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonUpdateInput {
    pub uuid: Uuid,
    pub given_name: String,
    pub surname: String,
    pub validity: WriteValidity,
}

/// Read-write facade over the downstream organisation store.
#[async_trait]
pub trait DstFacade: Send + Sync {
    async fn get_facet_class(
        &self,
        facet_user_key: &str,
        class_user_key: &str,
    ) -> Result<Option<DstClass>, DstError>;

    async fn get_org_root(&self) -> Result<Uuid, DstError>;

    async fn get_org_units(&self) -> Result<Vec<DstUnitRecord>, DstError>;

    async fn get_unit_timeline(&self, unit: Uuid) -> Result<Vec<DstUnitValidity>, DstError>;

    async fn get_unit_timeline_between(
        &self,
        unit: Uuid,
        validity: WriteValidity,
    ) -> Result<Vec<DstUnitValidity>, DstError>;

    async fn create_unit(&self, input: UnitCreateInput) -> Result<Uuid, DstError>;
    async fn update_unit(&self, input: UnitUpdateInput) -> Result<Uuid, DstError>;
    async fn terminate_unit(&self, input: UnitTerminateInput) -> Result<Uuid, DstError>;

    /// The (cpr, employment id) pairs currently engaged under a unit.
    async fn get_unit_engagement_keys(
        &self,
        unit: Uuid,
    ) -> Result<Vec<(String, String)>, DstError>;

    async fn get_engagement_timeline(
        &self,
        cpr: &str,
        user_key: &str,
    ) -> Result<Vec<DstEngagementValidity>, DstError>;

    async fn create_engagement(&self, input: EngagementCreateInput) -> Result<Uuid, DstError>;
    async fn update_engagement(&self, input: EngagementUpdateInput) -> Result<Uuid, DstError>;
    async fn terminate_engagement(
        &self,
        input: EngagementTerminateInput,
    ) -> Result<Uuid, DstError>;

    async fn get_leave_timeline(
        &self,
        cpr: &str,
        user_key: &str,
    ) -> Result<Vec<DstLeaveValidity>, DstError>;

    async fn create_leave(&self, input: LeaveCreateInput) -> Result<Uuid, DstError>;
    async fn update_leave(&self, input: LeaveUpdateInput) -> Result<Uuid, DstError>;

    async fn get_person(&self, cpr: &str) -> Result<Option<DstPersonValidity>, DstError>;
    async fn create_person(&self, input: PersonCreateInput) -> Result<Uuid, DstError>;
    async fn update_person(&self, input: PersonUpdateInput) -> Result<Uuid, DstError>;

    async fn create_address(&self, input: AddressCreateInput) -> Result<Uuid, DstError>;
    async fn update_address(&self, input: AddressUpdateInput) -> Result<Uuid, DstError>;
}

/// HTTP implementation of the downstream facade.
pub struct DstClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl DstClient {
    pub fn new(
        base_url: String,
        token: String,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url, token })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DstError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DstError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        if response.status().is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DstError::Rejected(detail));
        }
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct UuidEnvelope {
    uuid: Uuid,
}

#[async_trait]
impl DstFacade for DstClient {
    async fn get_facet_class(
        &self,
        facet_user_key: &str,
        class_user_key: &str,
    ) -> Result<Option<DstClass>, DstError> {
        self.get_json(
            "/classes",
            &[("facet", facet_user_key), ("user_key", class_user_key)],
        )
        .await
    }

    async fn get_org_root(&self) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.get_json("/organisation", &[]).await?;
        Ok(envelope.uuid)
    }

    async fn get_org_units(&self) -> Result<Vec<DstUnitRecord>, DstError> {
        self.get_json("/org-units", &[]).await
    }

    async fn get_unit_timeline(&self, unit: Uuid) -> Result<Vec<DstUnitValidity>, DstError> {
        let unit = unit.to_string();
        self.get_json("/org-units/timeline", &[("uuid", unit.as_str())])
            .await
    }

    async fn get_unit_timeline_between(
        &self,
        unit: Uuid,
        validity: WriteValidity,
    ) -> Result<Vec<DstUnitValidity>, DstError> {
        let unit = unit.to_string();
        let from = validity.from.to_rfc3339();
        let mut query = vec![("uuid", unit.as_str()), ("from", from.as_str())];
        let to = validity.to.map(|t| t.to_rfc3339());
        if let Some(to) = to.as_deref() {
            query.push(("to", to));
        }
        self.get_json("/org-units/timeline", &query).await
    }

    async fn create_unit(&self, input: UnitCreateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/org-units/create", &input).await?;
        Ok(envelope.uuid)
    }

    async fn update_unit(&self, input: UnitUpdateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/org-units/update", &input).await?;
        Ok(envelope.uuid)
    }

    async fn terminate_unit(&self, input: UnitTerminateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/org-units/terminate", &input).await?;
        Ok(envelope.uuid)
    }

    async fn get_unit_engagement_keys(
        &self,
        unit: Uuid,
    ) -> Result<Vec<(String, String)>, DstError> {
        let unit = unit.to_string();
        self.get_json("/org-units/engagements", &[("uuid", unit.as_str())])
            .await
    }

    async fn get_engagement_timeline(
        &self,
        cpr: &str,
        user_key: &str,
    ) -> Result<Vec<DstEngagementValidity>, DstError> {
        self.get_json(
            "/engagements/timeline",
            &[("cpr", cpr), ("user_key", user_key)],
        )
        .await
    }

    async fn create_engagement(&self, input: EngagementCreateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/engagements/create", &input).await?;
        Ok(envelope.uuid)
    }

    async fn update_engagement(&self, input: EngagementUpdateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/engagements/update", &input).await?;
        Ok(envelope.uuid)
    }

    async fn terminate_engagement(
        &self,
        input: EngagementTerminateInput,
    ) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/engagements/terminate", &input).await?;
        Ok(envelope.uuid)
    }

    async fn get_leave_timeline(
        &self,
        cpr: &str,
        user_key: &str,
    ) -> Result<Vec<DstLeaveValidity>, DstError> {
        self.get_json("/leaves/timeline", &[("cpr", cpr), ("user_key", user_key)])
            .await
    }

    async fn create_leave(&self, input: LeaveCreateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/leaves/create", &input).await?;
        Ok(envelope.uuid)
    }

    async fn update_leave(&self, input: LeaveUpdateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/leaves/update", &input).await?;
        Ok(envelope.uuid)
    }

    async fn get_person(&self, cpr: &str) -> Result<Option<DstPersonValidity>, DstError> {
        self.get_json("/employees", &[("cpr", cpr)]).await
    }

    async fn create_person(&self, input: PersonCreateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/employees/create", &input).await?;
        Ok(envelope.uuid)
    }

    async fn update_person(&self, input: PersonUpdateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/employees/update", &input).await?;
        Ok(envelope.uuid)
    }

    async fn create_address(&self, input: AddressCreateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/addresses/create", &input).await?;
        Ok(envelope.uuid)
    }

    async fn update_address(&self, input: AddressUpdateInput) -> Result<Uuid, DstError> {
        let envelope: UuidEnvelope = self.post_json("/addresses/update", &input).await?;
        Ok(envelope.uuid)
    }
}
