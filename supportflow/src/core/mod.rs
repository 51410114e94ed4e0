//! Core domain model types.
//!
//! This module contains the fundamental types shared by stages and the
//! executor:
//! - Stage status and kind enums
//! - Stage output type with factory methods
//! - Routing decisions and their parser

mod output;
mod routing;
mod status;

pub use output::{StageFailure, StageOutput};
pub use routing::{parse_routing_result, RoutingResult};
pub use status::{StageKind, StageStatus};
