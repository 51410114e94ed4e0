use crate::tools::{
    CreateTicketParams, Customer, CustomerField, CustomerStatus, GetCustomerHistoryParams,
    GetCustomerParams, ListCustomersParams, Ticket, TicketPriority, ToolDescriptor,
    UpdateCustomerParams,
};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::info;

/// JSON-RPC code for an unknown method.
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC code for parameters that do not decode.
pub const RPC_INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone)]
struct CustomerRow {
    id: i64,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    status: CustomerStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CustomerRow {
    fn to_record(&self) -> Customer {
        Customer {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            status: self.status,
            created_at: timestamp(self.created_at),
            updated_at: timestamp(self.updated_at),
        }
    }
}

#[derive(Debug, Clone)]
struct TicketRow {
    id: i64,
    customer_id: i64,
    issue: String,
    status: String,
    priority: TicketPriority,
    created_at: DateTime<Utc>,
}

impl TicketRow {
    fn to_record(&self) -> Ticket {
        Ticket {
            id: self.id,
            customer_id: self.customer_id,
            issue: self.issue.clone(),
            status: self.status.clone(),
            priority: self.priority,
            created_at: timestamp(self.created_at),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    customers: Vec<CustomerRow>,
    tickets: Vec<TicketRow>,
    next_customer_id: i64,
    next_ticket_id: i64,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Customers and tickets held in memory.
#[derive(Debug, Default)]
pub struct CustomerDirectory {
    tables: Mutex<Tables>,
}

impl CustomerDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_customer_id: 1,
                next_ticket_id: 1,
                ..Tables::default()
            }),
        }
    }

    /// Creates a directory seeded with demo customers and tickets.
    ///
    /// Customer 3 has ticket history; customer 4 has none.
    #[must_use]
    pub fn with_sample_data() -> Self {
        let directory = Self::new();
        let seed = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).single().unwrap_or_else(Utc::now);

        for (name, email, phone, status) in [
            ("John Doe", Some("john.doe@example.com"), Some("+1-555-0101"), CustomerStatus::Active),
            ("Jane Smith", Some("jane.smith@example.com"), Some("+1-555-0102"), CustomerStatus::Active),
            ("Bob Johnson", Some("bob.johnson@example.com"), None, CustomerStatus::Active),
            ("Alice Williams", Some("alice.w@example.com"), Some("+1-555-0104"), CustomerStatus::Disabled),
            ("Charlie Brown", None, Some("+1-555-0105"), CustomerStatus::Active),
        ] {
            directory.insert_customer(
                name,
                email.map(str::to_string),
                phone.map(str::to_string),
                status,
                seed(2024, 1, 15),
            );
        }

        for (customer_id, issue, status, priority, at) in [
            (1, "Cannot login to account", "open", TicketPriority::High, seed(2024, 3, 1)),
            (3, "Billing discrepancy on last invoice", "resolved", TicketPriority::Medium, seed(2024, 2, 10)),
            (3, "Password reset email not received", "in_progress", TicketPriority::High, seed(2024, 3, 5)),
            (3, "Feature request: dark mode", "open", TicketPriority::Low, seed(2024, 1, 20)),
            (5, "Shipping address update", "open", TicketPriority::Low, seed(2024, 2, 28)),
        ] {
            directory.insert_ticket(customer_id, issue, status, priority, at);
        }

        directory
    }

    /// Adds a customer and returns its id.
    pub fn insert_customer(
        &self,
        name: impl Into<String>,
        email: Option<String>,
        phone: Option<String>,
        status: CustomerStatus,
        created_at: DateTime<Utc>,
    ) -> i64 {
        let mut tables = self.tables.lock();
        let id = tables.next_customer_id;
        tables.next_customer_id += 1;
        tables.customers.push(CustomerRow {
            id,
            name: name.into(),
            email,
            phone,
            status,
            created_at,
            updated_at: created_at,
        });
        id
    }

    fn insert_ticket(
        &self,
        customer_id: i64,
        issue: &str,
        status: &str,
        priority: TicketPriority,
        created_at: DateTime<Utc>,
    ) -> Ticket {
        let mut tables = self.tables.lock();
        let id = tables.next_ticket_id;
        tables.next_ticket_id += 1;
        let row = TicketRow {
            id,
            customer_id,
            issue: issue.to_string(),
            status: status.to_string(),
            priority,
            created_at,
        };
        let record = row.to_record();
        tables.tickets.push(row);
        record
    }

    /// Retrieves a customer; `None` for an unknown id.
    #[must_use]
    pub fn get_customer(&self, customer_id: i64) -> Option<Customer> {
        self.tables
            .lock()
            .customers
            .iter()
            .find(|c| c.id == customer_id)
            .map(CustomerRow::to_record)
    }

    /// Lists customers with `status`, at most `limit` of them, in id order.
    #[must_use]
    pub fn list_customers(&self, status: CustomerStatus, limit: u32) -> Vec<Customer> {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        self.tables
            .lock()
            .customers
            .iter()
            .filter(|c| c.status == status)
            .take(limit)
            .map(CustomerRow::to_record)
            .collect()
    }

    /// Updates one customer field.
    ///
    /// Returns the tool's JSON result: `{success, message}` or `{error}`.
    #[must_use]
    pub fn update_customer(&self, params: &UpdateCustomerParams) -> Value {
        if params.field_name == "id" {
            return rejection("Cannot update ID field.");
        }
        let Some(field) = CustomerField::parse(&params.field_name) else {
            return rejection("Invalid field name.");
        };

        let mut tables = self.tables.lock();
        let Some(row) = tables
            .customers
            .iter_mut()
            .find(|c| c.id == params.customer_id)
        else {
            return rejection("Customer not found.");
        };

        match field {
            CustomerField::Status => {
                let Some(status) = params.field_value.as_str().and_then(CustomerStatus::parse)
                else {
                    return rejection("Invalid status value.");
                };
                row.status = status;
            }
            CustomerField::Name => row.name = text_value(&params.field_value),
            CustomerField::Email => row.email = optional_text(&params.field_value),
            CustomerField::Phone => row.phone = optional_text(&params.field_value),
        }

        // Updates must be observable even within one clock tick.
        let now = Utc::now();
        let floor = row.updated_at + chrono::Duration::microseconds(1);
        row.updated_at = if now > row.updated_at { now } else { floor };

        info!(customer_id = params.customer_id, field = %params.field_name, "Customer updated");
        json!({
            "success": true,
            "message": format!("Customer {} updated.", params.customer_id),
        })
    }

    /// Opens a ticket with status `open`.
    ///
    /// Returns the new ticket, or `{error}` for an unknown priority.
    #[must_use]
    pub fn create_ticket(&self, params: &CreateTicketParams) -> Value {
        let Some(priority) = TicketPriority::parse(&params.priority) else {
            return rejection("Invalid priority.");
        };
        let ticket = self.insert_ticket(params.customer_id, &params.issue, "open", priority, Utc::now());
        info!(ticket_id = ticket.id, customer_id = ticket.customer_id, "Ticket created");
        serde_json::to_value(ticket).unwrap_or(Value::Null)
    }

    /// Tickets for a customer, most recent first; ties broken by id, descending.
    #[must_use]
    pub fn get_customer_history(&self, customer_id: i64) -> Vec<Ticket> {
        let tables = self.tables.lock();
        let mut rows: Vec<&TicketRow> = tables
            .tickets
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.into_iter().map(TicketRow::to_record).collect()
    }

    /// JSON entry point used by the in-process transport.
    ///
    /// # Errors
    ///
    /// Returns a JSON-RPC `(code, message)` for unknown methods or bad params.
    pub fn dispatch(&self, method: &str, params: &Value) -> Result<Value, (i64, String)> {
        if method == "tools/list" {
            let tools: Vec<Value> = ToolDescriptor::ALL.iter().map(|t| t.to_listing()).collect();
            return Ok(json!({ "tools": tools }));
        }

        let Some(tool) = ToolDescriptor::from_name(method) else {
            return Err((RPC_METHOD_NOT_FOUND, format!("Method not found: {method}")));
        };

        match tool {
            ToolDescriptor::GetCustomer => {
                let p: GetCustomerParams = decode(tool, params)?;
                Ok(to_json(self.get_customer(p.customer_id)))
            }
            ToolDescriptor::ListCustomers => {
                let p: ListCustomersParams = decode(tool, params)?;
                Ok(to_json(self.list_customers(p.status, p.limit)))
            }
            ToolDescriptor::UpdateCustomer => {
                let p: UpdateCustomerParams = decode(tool, params)?;
                Ok(self.update_customer(&p))
            }
            ToolDescriptor::CreateTicket => {
                let p: CreateTicketParams = decode(tool, params)?;
                Ok(self.create_ticket(&p))
            }
            ToolDescriptor::GetCustomerHistory => {
                let p: GetCustomerHistoryParams = decode(tool, params)?;
                Ok(to_json(self.get_customer_history(p.customer_id)))
            }
        }
    }
}

fn decode<T: DeserializeOwned>(tool: ToolDescriptor, params: &Value) -> Result<T, (i64, String)> {
    serde_json::from_value(params.clone())
        .map_err(|e| (RPC_INVALID_PARAMS, format!("Invalid params for {tool}: {e}")))
}

fn to_json<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn rejection(reason: &str) -> Value {
    json!({ "error": reason })
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn optional_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(text_value(other)),
    }
}
