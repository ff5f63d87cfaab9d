use async_trait::async_trait;
use uuid::Uuid;

use crate::dest::writer::write_validity;
use crate::dest::{AddressCreateInput, AddressUpdateInput, DstError, DstFacade};
use crate::models::org::{Address, AddressKind, OperationKind, OrgUnitNode};

/// Resolves a free-text postal address to its canonical registry uuid.
/// Failures are per-call soft errors; the affected unit is skipped.
#[async_trait]
pub trait AddressCleanser: Send + Sync {
    async fn cleanse_single(&self, text: &str) -> anyhow::Result<Uuid>;
}

/// HTTP implementation of the cleansing interface.
pub struct CleansingClient {
    http: reqwest::Client,
    base_url: String,
}

impl CleansingClient {
    pub fn new(base_url: String, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }
}

#[derive(serde::Deserialize)]
struct CleanseResponse {
    id: Uuid,
}

#[async_trait]
impl AddressCleanser for CleansingClient {
    async fn cleanse_single(&self, text: &str) -> anyhow::Result<Uuid> {
        let url = format!("{}/cleanse", self.base_url);
        let response: CleanseResponse = self
            .http
            .get(&url)
            .query(&[("text", text)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.id)
    }
}

/// A unit has at most one address of each kind; more than one is a data
/// error that skips the kind for this unit.
fn unit_address(node: &OrgUnitNode, kind: AddressKind) -> Option<&Address> {
    let mut matches = node.addresses.iter().filter(|a| a.kind == kind);
    let first = matches.next()?;
    if matches.next().is_some() {
        tracing::error!(unit = %node.uuid, ?kind, "more than one address of this kind, skipping");
        return None;
    }
    Some(first)
}

/// Decide what to do about one address kind: create when downstream has
/// none, update (carrying the downstream uuid) when the values differ,
/// nothing when they agree.
fn plan(kind: AddressKind, desired_value: &str, mo_unit: &OrgUnitNode) -> Option<Address> {
    match unit_address(mo_unit, kind) {
        None => Some(Address {
            uuid: None,
            value: desired_value.to_string(),
            kind,
        }),
        Some(existing) if existing.value != desired_value => Some(Address {
            uuid: existing.uuid,
            value: desired_value.to_string(),
            kind,
        }),
        Some(_) => None,
    }
}

pub fn plan_pnumber(sd_unit: &OrgUnitNode, mo_unit: &OrgUnitNode) -> Option<Address> {
    let sd_addr = unit_address(sd_unit, AddressKind::Pnumber)?;
    plan(AddressKind::Pnumber, &sd_addr.value, mo_unit)
}

pub async fn plan_postal(
    cleanser: &dyn AddressCleanser,
    sd_unit: &OrgUnitNode,
    mo_unit: &OrgUnitNode,
) -> Option<Address> {
    let sd_addr = unit_address(sd_unit, AddressKind::Postal)?;
    let canonical = match cleanser.cleanse_single(&sd_addr.value).await {
        Ok(uuid) => uuid,
        Err(error) => {
            tracing::error!(
                unit = %sd_unit.uuid,
                address = %sd_addr.value,
                %error,
                "could not cleanse postal address, skipping"
            );
            return None;
        }
    };
    plan(AddressKind::Postal, &canonical.to_string(), mo_unit)
}

/// Applies planned address changes for the units of one institution.
pub struct AddressSync<'a> {
    dst: &'a dyn DstFacade,
    cleanser: &'a dyn AddressCleanser,
    postal_type: Uuid,
    pnumber_type: Uuid,
    dry_run: bool,
}

impl<'a> AddressSync<'a> {
    pub fn new(
        dst: &'a dyn DstFacade,
        cleanser: &'a dyn AddressCleanser,
        postal_type: Uuid,
        pnumber_type: Uuid,
        dry_run: bool,
    ) -> Self {
        Self { dst, cleanser, postal_type, pnumber_type, dry_run }
    }

    fn type_uuid(&self, kind: AddressKind) -> Uuid {
        match kind {
            AddressKind::Postal => self.postal_type,
            AddressKind::Pnumber => self.pnumber_type,
        }
    }

    async fn apply(
        &self,
        planned: Address,
        sd_unit: &OrgUnitNode,
        mo_unit: &OrgUnitNode,
    ) -> Result<(OperationKind, Uuid), DstError> {
        let validity = write_validity(sd_unit.validity.from, sd_unit.validity.to);
        match planned.uuid {
            None => {
                tracing::info!(unit = %mo_unit.uuid, value = %planned.value, "adding address");
                if !self.dry_run {
                    self.dst
                        .create_address(AddressCreateInput {
                            org_unit: mo_unit.uuid,
                            value: planned.value,
                            address_type: self.type_uuid(planned.kind),
                            validity,
                        })
                        .await?;
                }
                Ok((OperationKind::AddAddress, mo_unit.uuid))
            }
            Some(existing) => {
                tracing::info!(unit = %mo_unit.uuid, value = %planned.value, "updating address");
                if !self.dry_run {
                    self.dst
                        .update_address(AddressUpdateInput {
                            uuid: existing,
                            value: planned.value,
                            validity,
                        })
                        .await?;
                }
                Ok((OperationKind::UpdateAddress, mo_unit.uuid))
            }
        }
    }

    /// Reconcile both address kinds for one unit pair. Postal sync can
    /// be withheld for units outside the line management.
    pub async fn sync_unit(
        &self,
        sd_unit: &OrgUnitNode,
        mo_unit: &OrgUnitNode,
        postal_allowed: bool,
    ) -> Result<Vec<(OperationKind, Uuid)>, DstError> {
        let mut operations = Vec::new();

        if let Some(planned) = plan_pnumber(sd_unit, mo_unit) {
            operations.push(self.apply(planned, sd_unit, mo_unit).await?);
        }
        if postal_allowed {
            if let Some(planned) = plan_postal(self.cleanser, sd_unit, mo_unit).await {
                operations.push(self.apply(planned, sd_unit, mo_unit).await?);
            }
        }

        Ok(operations)
    }
}
