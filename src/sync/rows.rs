//! Typed rows for the critical tables.
//!
//! The gateway delivers rows as raw JSON; this module gives every critical
//! table a concrete row shape plus the `TableRow` tagged union the cache and
//! callback fan-out operate on, so cache mutation is exhaustively checked
//! instead of pushing untyped payloads around.

use serde::{Deserialize, Serialize};

/// One of the four tables the data listeners always watch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CriticalTable {
    Properties,
    Leases,
    Payments,
    Profiles,
}

impl CriticalTable {
    /// All critical tables, in listener start order.
    pub const ALL: [CriticalTable; 4] = [
        CriticalTable::Properties,
        CriticalTable::Leases,
        CriticalTable::Payments,
        CriticalTable::Profiles,
    ];

    /// Backend table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CriticalTable::Properties => "properties",
            CriticalTable::Leases => "leases",
            CriticalTable::Payments => "payments",
            CriticalTable::Profiles => "profiles",
        }
    }

    /// Decode a raw row payload into this table's row shape.
    pub fn decode_row(&self, value: &serde_json::Value) -> Result<TableRow, serde_json::Error> {
        match self {
            CriticalTable::Properties => {
                serde_json::from_value(value.clone()).map(TableRow::Property)
            }
            CriticalTable::Leases => serde_json::from_value(value.clone()).map(TableRow::Lease),
            CriticalTable::Payments => serde_json::from_value(value.clone()).map(TableRow::Payment),
            CriticalTable::Profiles => serde_json::from_value(value.clone()).map(TableRow::Profile),
        }
    }
}

impl std::fmt::Display for CriticalTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyStatus {
    Available,
    Rented,
    Sold,
    Maintenance,
}

/// A property listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Property {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    pub status: PropertyStatus,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Active,
    Expired,
    Terminated,
}

/// A lease binding a tenant to a property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub id: String,
    pub property_id: String,
    pub tenant_id: String,
    pub start_date: String,
    pub end_date: String,
    pub monthly_rent: f64,
    pub status: LeaseStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

/// A rent payment against a lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: String,
    pub lease_id: String,
    pub amount: f64,
    pub payment_date: String,
    pub due_date: String,
    pub status: PaymentStatus,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Owner,
    Tenant,
    Admin,
}

/// A user profile row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub phone: Option<String>,
    pub updated_at: String,
}

/// A row of any critical table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TableRow {
    Property(Property),
    Lease(Lease),
    Payment(Payment),
    Profile(UserProfile),
}

impl TableRow {
    /// Primary key, used for cache replace/remove matching.
    pub fn id(&self) -> &str {
        match self {
            TableRow::Property(row) => &row.id,
            TableRow::Lease(row) => &row.id,
            TableRow::Payment(row) => &row.id,
            TableRow::Profile(row) => &row.id,
        }
    }

    pub fn table(&self) -> CriticalTable {
        match self {
            TableRow::Property(_) => CriticalTable::Properties,
            TableRow::Lease(_) => CriticalTable::Leases,
            TableRow::Payment(_) => CriticalTable::Payments,
            TableRow::Profile(_) => CriticalTable::Profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_property_row() {
        let raw = serde_json::json!({
            "id": "p-1",
            "title": "Apartment 12b",
            "price": 1450.0,
            "status": "available",
            "owner_id": "user-42",
            "created_at": "2025-01-10T09:00:00Z",
            "updated_at": "2025-01-10T09:00:00Z"
        });

        let row = CriticalTable::Properties.decode_row(&raw).unwrap();
        assert_eq!(row.id(), "p-1");
        assert_eq!(row.table(), CriticalTable::Properties);
        match row {
            TableRow::Property(p) => assert_eq!(p.status, PropertyStatus::Available),
            other => panic!("unexpected row: {:?}", other),
        }
    }

    #[test]
    fn rejects_mismatched_row_shape() {
        let raw = serde_json::json!({ "id": "x-1", "amount": 12.0 });
        assert!(CriticalTable::Leases.decode_row(&raw).is_err());
    }
}
