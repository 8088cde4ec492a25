use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::MemberId;
use crate::record::Record;
use crate::Amount;

/// Document field names for member records.
pub mod field {
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const ADDRESS: &str = "address";
    pub const MEMBER_TYPE: &str = "memberType";
    pub const ID_NUMBER: &str = "idNumber";
    pub const DEPARTMENT: &str = "department";
    pub const STATUS: &str = "status";
    pub const JOIN_DATE: &str = "joinDate";
    pub const LAST_RENEWED: &str = "lastRenewed";
    pub const EXPIRY_DATE: &str = "expiryDate";
    pub const TOTAL_BOOKS_CHECKED_OUT: &str = "totalBooksCheckedOut";
    pub const TOTAL_FINES: &str = "totalFines";
    pub const CURRENT_FINES: &str = "currentFines";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Standing of a member account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
    Graduated,
}

impl MemberStatus {
    pub const ALL: [MemberStatus; 4] = [
        Self::Active,
        Self::Inactive,
        Self::Suspended,
        Self::Graduated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
            Self::Graduated => "graduated",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TypeError::UnknownVariant {
                kind: "member status",
                value: s.to_string(),
            })
    }
}

/// Membership category; determines the membership term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Student,
    Faculty,
    Staff,
    Guest,
}

impl MemberType {
    pub const ALL: [MemberType; 4] = [Self::Student, Self::Faculty, Self::Staff, Self::Guest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Faculty => "faculty",
            Self::Staff => "staff",
            Self::Guest => "guest",
        }
    }

    /// Length of one membership term.
    pub fn term(&self) -> Months {
        match self {
            Self::Student => Months::new(24),
            Self::Faculty => Months::new(60),
            Self::Staff => Months::new(36),
            Self::Guest => Months::new(6),
        }
    }

    /// Expiry of a term starting at `from`.
    ///
    /// Month arithmetic clamps to the last day of shorter months; an
    /// out-of-range result saturates at `DateTime::<Utc>::MAX_UTC`.
    pub fn expiry_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_months(self.term())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TypeError::UnknownVariant {
                kind: "member type",
                value: s.to_string(),
            })
    }
}

/// A registered borrower.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(skip)]
    pub id: MemberId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    pub member_type: MemberType,
    #[serde(default)]
    pub id_number: String,
    #[serde(default)]
    pub department: String,
    pub status: MemberStatus,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub join_date: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_renewed: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expiry_date: DateTime<Utc>,
    #[serde(default)]
    pub total_books_checked_out: i64,
    #[serde(default)]
    pub total_fines: Amount,
    #[serde(default)]
    pub current_fines: Amount,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Member {
    /// Whether the membership is still valid at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date < now
    }

    pub fn has_outstanding_fines(&self) -> bool {
        self.current_fines > 0
    }
}

impl Record for Member {
    type Id = MemberId;

    fn id(&self) -> &MemberId {
        &self.id
    }

    fn set_id(&mut self, id: MemberId) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn expiry_by_member_type() {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(
            MemberType::Student.expiry_from(start),
            Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(
            MemberType::Faculty.expiry_from(start),
            Utc.with_ymd_and_hms(2029, 3, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(
            MemberType::Staff.expiry_from(start),
            Utc.with_ymd_and_hms(2027, 3, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(
            MemberType::Guest.expiry_from(start),
            Utc.with_ymd_and_hms(2024, 9, 15, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn decodes_legacy_document_without_counters() {
        let doc = json!({
            "name": "Ada",
            "email": "ada@example.org",
            "memberType": "faculty",
            "status": "active",
            "expiryDate": 1_900_000_000_000i64
        });
        let member = Member::from_fields("m1", doc.as_object().unwrap().clone()).unwrap();
        assert_eq!(member.id.as_str(), "m1");
        assert_eq!(member.current_fines, 0);
        assert_eq!(member.total_books_checked_out, 0);
        assert!(!member.has_outstanding_fines());
    }

    #[test]
    fn status_and_type_parse() {
        assert_eq!("suspended".parse::<MemberStatus>().unwrap(), MemberStatus::Suspended);
        assert_eq!("guest".parse::<MemberType>().unwrap(), MemberType::Guest);
        assert!("alumni".parse::<MemberType>().is_err());
    }
}
