//! Remote tool invocation.
//!
//! This module provides:
//! - The closed tool catalog and its typed parameters and records
//! - JSON-RPC transports (HTTPS and in-process)
//! - The authenticated, retrying [`ToolClient`]

mod catalog;
mod client;
mod transport;

pub use catalog::{
    CreateTicketParams, Customer, CustomerField, CustomerStatus, GetCustomerHistoryParams,
    GetCustomerParams, ListCustomersParams, Ticket, TicketPriority, ToolDescriptor, ToolResponse,
    UpdateAck, UpdateCustomerParams,
};
pub use client::ToolClient;
pub use transport::{HttpTransport, LocalTransport, RpcRequest, ToolTransport};
