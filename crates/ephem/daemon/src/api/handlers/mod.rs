//! API request handlers

mod doctor;
mod health;
mod stacks;
mod teardown;

pub use doctor::*;
pub use health::*;
pub use stacks::*;
pub use teardown::*;

use crate::error::{ApiError, ApiResult};
use ephem_types::StackName;

fn parse_stack_name(name: &str) -> ApiResult<StackName> {
    name.parse()
        .map_err(|e: ephem_types::TypesError| ApiError::Validation(e.to_string()))
}
