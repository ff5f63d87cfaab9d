pub mod timeline;
pub mod tree;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::org::Person;

#[derive(Debug, Error)]
pub enum SrcError {
    #[error("person not found upstream")]
    PersonNotFound,
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream fault: {0}")]
    Fault(String),
}

impl SrcError {
    /// Transient errors skip the affected entity; the run continues.
    pub fn is_transient(&self) -> bool {
        matches!(self, SrcError::Http(_))
    }
}

/// Raw employment status codes as reported by the source.
///
/// Code 3 (leave) counts as employed for the engagement timeline and
/// additionally feeds the leave timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmploymentStatus {
    EmployedNoPay,
    EmployedWithPay,
    Leave,
    Migrated,
    Resigned,
    Retired,
    Deleted,
}

impl EmploymentStatus {
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::EmployedNoPay),
            "1" => Some(Self::EmployedWithPay),
            "3" => Some(Self::Leave),
            "7" => Some(Self::Migrated),
            "8" => Some(Self::Resigned),
            "9" => Some(Self::Retired),
            "S" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::EmployedNoPay | Self::EmployedWithPay | Self::Leave
        )
    }

    pub fn is_leave(self) -> bool {
        matches!(self, Self::Leave)
    }
}

/// One parent link from the source's organisation response. A `None`
/// parent marks a department directly under the institution root.
#[derive(Debug, Clone, Deserialize)]
pub struct SrcParentLink {
    pub unit: Uuid,
    pub parent: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SrcOrganization {
    pub links: Vec<SrcParentLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrcDepartment {
    pub uuid: Uuid,
    pub identifier: String,
    pub name: String,
    pub level_identifier: String,
    pub activation_date: NaiveDate,
    pub deactivation_date: NaiveDate,
    pub postal_address: Option<String>,
    pub production_unit_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrcEmploymentStatus {
    pub code: String,
    pub activation_date: NaiveDate,
    pub deactivation_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrcProfession {
    pub job_position_identifier: String,
    pub employment_name: String,
    pub activation_date: NaiveDate,
    pub deactivation_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrcEmploymentDepartment {
    pub department_uuid: Uuid,
    pub department_identifier: String,
    pub activation_date: NaiveDate,
    pub deactivation_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrcWorkingTime {
    pub salaried_indicator: bool,
    #[serde(default)]
    pub full_time_indicator: Option<bool>,
    pub activation_date: NaiveDate,
    pub deactivation_date: NaiveDate,
}

/// The per-employment change history for one (person, employment id) pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SrcEmployment {
    #[serde(default)]
    pub statuses: Vec<SrcEmploymentStatus>,
    #[serde(default)]
    pub professions: Vec<SrcProfession>,
    #[serde(default)]
    pub departments: Vec<SrcEmploymentDepartment>,
    #[serde(default)]
    pub working_time: Vec<SrcWorkingTime>,
}

/// Read-only facade over the authoritative source.
///
/// All dates are plain calendar dates in the source's fixed zone; the
/// readers in [`timeline`] and [`tree`] convert them to UTC instants.
#[async_trait]
pub trait SrcFacade: Send + Sync {
    async fn get_organization(&self, institution: &str) -> Result<SrcOrganization, SrcError>;

    async fn get_departments(&self, institution: &str) -> Result<Vec<SrcDepartment>, SrcError>;

    /// Parent of a single department, for splicing orphan chains.
    async fn get_department_parent(
        &self,
        institution: &str,
        department: Uuid,
    ) -> Result<Option<Uuid>, SrcError>;

    async fn get_employment_changed(
        &self,
        institution: &str,
        cpr: &str,
        employment_id: &str,
    ) -> Result<SrcEmployment, SrcError>;

    async fn get_person(&self, institution: &str, cpr: &str) -> Result<Person, SrcError>;
}

/// HTTP implementation of the source facade.
pub struct SrcClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl SrcClient {
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url, username, password })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SrcError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SrcError::PersonNotFound);
        }
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SrcFacade for SrcClient {
    async fn get_organization(&self, institution: &str) -> Result<SrcOrganization, SrcError> {
        self.get_json("/organization", &[("institution_identifier", institution)])
            .await
    }

    async fn get_departments(&self, institution: &str) -> Result<Vec<SrcDepartment>, SrcError> {
        self.get_json("/departments", &[("institution_identifier", institution)])
            .await
    }

    async fn get_department_parent(
        &self,
        institution: &str,
        department: Uuid,
    ) -> Result<Option<Uuid>, SrcError> {
        let department = department.to_string();
        self.get_json(
            "/department/parent",
            &[
                ("institution_identifier", institution),
                ("department_uuid", department.as_str()),
            ],
        )
        .await
    }

    async fn get_employment_changed(
        &self,
        institution: &str,
        cpr: &str,
        employment_id: &str,
    ) -> Result<SrcEmployment, SrcError> {
        self.get_json(
            "/employment/changed",
            &[
                ("institution_identifier", institution),
                ("cpr", cpr),
                ("employment_identifier", employment_id),
            ],
        )
        .await
    }

    async fn get_person(&self, institution: &str, cpr: &str) -> Result<Person, SrcError> {
        self.get_json(
            "/person",
            &[("institution_identifier", institution), ("cpr", cpr)],
        )
        .await
    }
}
