//! The closed catalog of customer-support tools and their I/O types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::errors::ToolError;

/// A tool the remote endpoint exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolDescriptor {
    /// Retrieve a customer by id.
    GetCustomer,
    /// List customers filtered by status.
    ListCustomers,
    /// Update one customer field.
    UpdateCustomer,
    /// Open a support ticket.
    CreateTicket,
    /// List a customer's tickets, most recent first.
    GetCustomerHistory,
}

impl ToolDescriptor {
    /// Every tool in the catalog.
    pub const ALL: [Self; 5] = [
        Self::GetCustomer,
        Self::ListCustomers,
        Self::UpdateCustomer,
        Self::CreateTicket,
        Self::GetCustomerHistory,
    ];

    /// The wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::GetCustomer => "get_customer",
            Self::ListCustomers => "list_customers",
            Self::UpdateCustomer => "update_customer",
            Self::CreateTicket => "create_ticket",
            Self::GetCustomerHistory => "get_customer_history",
        }
    }

    /// Looks a tool up by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Human-readable description, also sent to generation backends.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::GetCustomer => "Retrieve a customer by ID.",
            Self::ListCustomers => {
                "List customers filtered by status ('active' or 'disabled')."
            }
            Self::UpdateCustomer => "Update a specific field for a customer.",
            Self::CreateTicket => "Create a new support ticket for a customer.",
            Self::GetCustomerHistory => "Return all support tickets for a specific customer.",
        }
    }

    /// JSON schema of the parameters.
    #[must_use]
    pub fn input_schema(self) -> Value {
        match self {
            Self::GetCustomer | Self::GetCustomerHistory => json!({
                "type": "object",
                "properties": {"customer_id": {"type": "integer"}},
                "required": ["customer_id"]
            }),
            Self::ListCustomers => json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["active", "disabled"]},
                    "limit": {"type": "integer", "default": 10}
                },
                "required": ["status"]
            }),
            Self::UpdateCustomer => json!({
                "type": "object",
                "properties": {
                    "customer_id": {"type": "integer"},
                    "field_name": {"type": "string"},
                    "field_value": {}
                },
                "required": ["customer_id", "field_name", "field_value"]
            }),
            Self::CreateTicket => json!({
                "type": "object",
                "properties": {
                    "customer_id": {"type": "integer"},
                    "issue": {"type": "string"},
                    "priority": {"type": "string", "enum": ["low", "medium", "high"]}
                },
                "required": ["customer_id", "issue", "priority"]
            }),
        }
    }

    /// The `tools/list` entry for this tool.
    #[must_use]
    pub fn to_listing(self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
        })
    }
}

impl fmt::Display for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolDescriptor {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s.trim()).ok_or_else(|| ToolError::not_allowed(s.trim()))
    }
}

/// Parameters for `get_customer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCustomerParams {
    /// The customer id.
    pub customer_id: i64,
}

/// Parameters for `list_customers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCustomersParams {
    /// Status filter.
    pub status: CustomerStatus,
    /// Maximum rows returned.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    10
}

impl ListCustomersParams {
    /// Creates params with the default limit.
    #[must_use]
    pub fn new(status: CustomerStatus) -> Self {
        Self {
            status,
            limit: default_limit(),
        }
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Parameters for `update_customer`.
///
/// `field_name` and `field_value` stay loosely typed: validating them is the
/// server's job and a bad value is a business rejection, not a client error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCustomerParams {
    /// The customer id.
    pub customer_id: i64,
    /// The field to change.
    pub field_name: String,
    /// The new value.
    pub field_value: Value,
}

/// Parameters for `create_ticket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTicketParams {
    /// The customer id.
    pub customer_id: i64,
    /// Free-text issue description.
    pub issue: String,
    /// Requested priority. Sent as a string so the server owns validation.
    pub priority: String,
}

/// Parameters for `get_customer_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCustomerHistoryParams {
    /// The customer id.
    pub customer_id: i64,
}

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    /// Active account.
    Active,
    /// Disabled account.
    Disabled,
}

impl CustomerStatus {
    /// The wire value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Parses a wire value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

impl TicketPriority {
    /// The wire value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parses a wire value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer fields that `update_customer` may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomerField {
    /// Display name.
    Name,
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// Account status.
    Status,
}

impl CustomerField {
    /// Parses a field name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "name" => Some(Self::Name),
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

/// A customer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Account status.
    pub status: CustomerStatus,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// A support ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket id.
    pub id: i64,
    /// Owning customer.
    pub customer_id: i64,
    /// Issue description.
    pub issue: String,
    /// Ticket status, `open` on creation.
    pub status: String,
    /// Priority.
    pub priority: TicketPriority,
    /// Creation timestamp.
    pub created_at: String,
}

/// Result of a successful `update_customer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAck {
    /// Always true.
    pub success: bool,
    /// Confirmation message.
    pub message: String,
}

/// What a tool call produced.
///
/// A business-rule rejection (`{"error": "..."}`) is a normal result, not a
/// transport failure, and is never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResponse<T = Value> {
    /// The tool succeeded.
    Success(T),
    /// The tool refused the request.
    Rejected {
        /// The server's reason.
        reason: String,
    },
}

impl ToolResponse<Value> {
    /// Splits a raw tool result into success or rejection.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        if let Some(reason) = rejection_reason(&value) {
            return Self::Rejected { reason };
        }
        Self::Success(value)
    }

    /// Decodes a success payload into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidResponse`] if the payload does not match `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<ToolResponse<T>, ToolError> {
        match self {
            Self::Success(value) => serde_json::from_value(value)
                .map(ToolResponse::Success)
                .map_err(|e| ToolError::InvalidResponse(e.to_string())),
            Self::Rejected { reason } => Ok(ToolResponse::Rejected { reason }),
        }
    }

    /// The JSON a stage stores: the payload, or `{"error": reason}`.
    #[must_use]
    pub fn to_content(&self) -> Value {
        match self {
            Self::Success(value) => value.clone(),
            Self::Rejected { reason } => json!({ "error": reason }),
        }
    }
}

impl<T> ToolResponse<T> {
    /// Returns true for a rejection.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Returns the success payload, if any.
    #[must_use]
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Rejected { .. } => None,
        }
    }
}

fn rejection_reason(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    match obj.get("error")? {
        Value::String(reason) => Some(reason.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
