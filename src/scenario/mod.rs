//! Scenario execution: the generic step runner, config-declared protocol
//! steps, and benchmark runs.

pub mod benchmark;
pub mod runner;
pub mod steps;

pub use benchmark::{BenchmarkReport, BenchmarkRunner};
pub use runner::{
    ScenarioReport, ScenarioRunner, ScenarioStep, StepFuture, StepRecord, StepStatus, Tally,
};
pub use steps::{
    connectivity_check, parse_tool_arguments, protocol_steps, single_call, ProtocolContext,
};
