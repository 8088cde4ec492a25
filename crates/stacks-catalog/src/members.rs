use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use stacks_store::{server_value, typed, Collection, FieldWrite, StoreError};
use stacks_types::member::field;
use stacks_types::transaction::field as tx_field;
use stacks_types::{Member, MemberId, MemberStatus, MemberType, Record};
use tracing::{debug, info};

use crate::error::{CatalogError, CatalogResult};
use crate::validate;
use crate::Catalog;

/// Input for registering a borrower.
#[derive(Clone, Debug)]
pub struct NewMember {
    pub name: String,
    pub email: String,
    pub member_type: MemberType,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub id_number: Option<String>,
    pub department: Option<String>,
}

impl NewMember {
    pub fn new(name: impl Into<String>, email: impl Into<String>, member_type: MemberType) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            member_type,
            phone: None,
            address: None,
            id_number: None,
            department: None,
        }
    }
}

/// Partial update of a member. `None` and blank strings leave a field alone.
#[derive(Clone, Debug, Default)]
pub struct MemberUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub id_number: Option<String>,
    pub department: Option<String>,
    /// Changing the type starts a fresh term from now.
    pub member_type: Option<MemberType>,
}

/// Fields a member search can match against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemberSearchField {
    #[default]
    Name,
    Email,
    IdNumber,
    Department,
}

impl MemberSearchField {
    fn value_of<'a>(&self, member: &'a Member) -> &'a str {
        match self {
            Self::Name => &member.name,
            Self::Email => &member.email,
            Self::IdNumber => &member.id_number,
            Self::Department => &member.department,
        }
    }
}

impl FromStr for MemberSearchField {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "email" => Self::Email,
            "idNumber" | "id_number" => Self::IdNumber,
            "department" => Self::Department,
            _ => Self::Name,
        })
    }
}

impl Catalog {
    /// Register a member with a fresh term for their type.
    pub async fn register_member(&self, input: NewMember) -> CatalogResult<MemberId> {
        let name = validate::required("name", &input.name)?;
        let email = validate::normalize_email(&input.email)?;
        self.ensure_email_free(&email, None).await?;

        let member = Member {
            id: MemberId::default(),
            name,
            email,
            phone: validate::optional(input.phone.as_deref()).unwrap_or_default(),
            address: validate::optional(input.address.as_deref()).unwrap_or_default(),
            member_type: input.member_type,
            id_number: validate::optional(input.id_number.as_deref()).unwrap_or_default(),
            department: validate::optional(input.department.as_deref()).unwrap_or_default(),
            status: MemberStatus::Active,
            join_date: None,
            last_renewed: None,
            expiry_date: input.member_type.expiry_from(self.clock.now()),
            total_books_checked_out: 0,
            total_fines: 0,
            current_fines: 0,
            updated_at: None,
        };

        let mut fields = member.to_fields().map_err(StoreError::from)?;
        fields.insert(field::JOIN_DATE.into(), server_value::timestamp());
        fields.insert(field::LAST_RENEWED.into(), server_value::timestamp());
        let key = self.store.append(Collection::Members, fields).await?;

        info!(
            member = %key,
            member_type = %member.member_type,
            expiry = %member.expiry_date,
            "member registered"
        );
        Ok(MemberId::from(key))
    }

    /// Fetch a member, or `None` if the key is absent.
    pub async fn find_member(&self, id: &MemberId) -> CatalogResult<Option<Member>> {
        Ok(typed::load(self.store.as_ref(), Collection::Members, id.as_str()).await?)
    }

    /// Fetch a member that must exist.
    pub async fn get_member(&self, id: &MemberId) -> CatalogResult<Member> {
        self.find_member(id)
            .await?
            .ok_or_else(|| CatalogError::MemberNotFound(id.clone()))
    }

    /// Apply a partial update. Counters and status are not touched here.
    pub async fn update_member(&self, id: &MemberId, update: MemberUpdate) -> CatalogResult<()> {
        let mut writes: Vec<(String, FieldWrite)> = Vec::new();

        if let Some(email) = validate::optional(update.email.as_deref()) {
            let email = validate::normalize_email(&email)?;
            self.ensure_email_free(&email, Some(id)).await?;
            writes.push((field::EMAIL.into(), FieldWrite::Set(Value::from(email))));
        }
        for (name, value) in [
            (field::NAME, update.name),
            (field::PHONE, update.phone),
            (field::ADDRESS, update.address),
            (field::ID_NUMBER, update.id_number),
            (field::DEPARTMENT, update.department),
        ] {
            if let Some(v) = validate::optional(value.as_deref()) {
                writes.push((name.into(), FieldWrite::Set(Value::from(v))));
            }
        }
        if let Some(member_type) = update.member_type {
            let expiry = member_type.expiry_from(self.clock.now());
            writes.push((
                field::MEMBER_TYPE.into(),
                FieldWrite::Set(Value::from(member_type.as_str())),
            ));
            writes.push((
                field::EXPIRY_DATE.into(),
                FieldWrite::Set(Value::from(expiry.timestamp_millis())),
            ));
        }
        writes.push((field::UPDATED_AT.into(), FieldWrite::ServerTimestamp));

        self.store
            .update(Collection::Members, id.as_str(), writes)
            .await
            .map_err(|e| member_not_found(e, id))?;
        debug!(member = %id, "member updated");
        Ok(())
    }

    /// Remove a member who has no active checkouts.
    pub async fn delete_member(&self, id: &MemberId) -> CatalogResult<()> {
        let active = self
            .active_transactions_for(tx_field::MEMBER_ID, id.as_str())
            .await?;
        if active > 0 {
            return Err(CatalogError::HasActiveTransactions {
                entity: "member",
                id: id.to_string(),
                count: active,
            });
        }
        if !self.store.delete(Collection::Members, id.as_str()).await? {
            return Err(CatalogError::MemberNotFound(id.clone()));
        }
        info!(member = %id, "member deleted");
        Ok(())
    }

    /// The newest `limit` members, newest first.
    pub async fn list_members(&self, limit: usize) -> CatalogResult<Vec<Member>> {
        let mut members: Vec<Member> =
            typed::scan(self.store.as_ref(), Collection::Members, Some(limit)).await?;
        members.reverse();
        Ok(members)
    }

    /// Case-insensitive substring search on one field. A blank query matches
    /// nothing.
    pub async fn search_members(
        &self,
        query: &str,
        on: MemberSearchField,
    ) -> CatalogResult<Vec<Member>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let members: Vec<Member> =
            typed::scan(self.store.as_ref(), Collection::Members, None).await?;
        Ok(members
            .into_iter()
            .filter(|m| on.value_of(m).to_lowercase().contains(&needle))
            .collect())
    }

    /// Start a new term from now and reactivate the member. Returns the new
    /// expiry.
    pub async fn renew_membership(&self, id: &MemberId) -> CatalogResult<DateTime<Utc>> {
        let member = self.get_member(id).await?;
        let expiry = member.member_type.expiry_from(self.clock.now());
        self.store
            .update(
                Collection::Members,
                id.as_str(),
                vec![
                    (
                        field::EXPIRY_DATE.into(),
                        FieldWrite::Set(Value::from(expiry.timestamp_millis())),
                    ),
                    (
                        field::STATUS.into(),
                        FieldWrite::Set(Value::from(MemberStatus::Active.as_str())),
                    ),
                    (field::LAST_RENEWED.into(), FieldWrite::ServerTimestamp),
                    (field::UPDATED_AT.into(), FieldWrite::ServerTimestamp),
                ],
            )
            .await
            .map_err(|e| member_not_found(e, id))?;
        info!(member = %id, expiry = %expiry, "membership renewed");
        Ok(expiry)
    }

    pub async fn update_member_status(
        &self,
        id: &MemberId,
        status: MemberStatus,
    ) -> CatalogResult<()> {
        self.store
            .update(
                Collection::Members,
                id.as_str(),
                vec![
                    (field::STATUS.into(), FieldWrite::Set(Value::from(status.as_str()))),
                    (field::UPDATED_AT.into(), FieldWrite::ServerTimestamp),
                ],
            )
            .await
            .map_err(|e| member_not_found(e, id))?;
        info!(member = %id, %status, "member status changed");
        Ok(())
    }

    pub async fn members_by_status(&self, status: MemberStatus) -> CatalogResult<Vec<Member>> {
        Ok(typed::query(
            self.store.as_ref(),
            Collection::Members,
            field::STATUS,
            &Value::from(status.as_str()),
        )
        .await?)
    }

    /// Fail with `DuplicateEmail` if another member already uses `email`.
    async fn ensure_email_free(&self, email: &str, owner: Option<&MemberId>) -> CatalogResult<()> {
        let holders = self
            .store
            .query_eq(Collection::Members, field::EMAIL, &Value::from(email))
            .await?;
        let taken = holders
            .iter()
            .any(|(key, _)| owner.map_or(true, |id| id.as_str() != key));
        if taken {
            return Err(CatalogError::DuplicateEmail(email.to_string()));
        }
        Ok(())
    }
}

fn member_not_found(err: StoreError, id: &MemberId) -> CatalogError {
    match err {
        StoreError::NotFound { .. } => CatalogError::MemberNotFound(id.clone()),
        other => other.into(),
    }
}
