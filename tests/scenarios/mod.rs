//! Scenario-based pipeline tests

mod conditions;
mod failure_handling;
mod retry_behavior;
mod success_chain;
mod variable_substitution;
