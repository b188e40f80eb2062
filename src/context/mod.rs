//! Discovered context, token estimation and budget enforcement
//!
//! This module decides how each skill is generated and keeps every
//! generation call within the configured token budget.

pub mod models;
pub mod strategy;
pub mod token_budget;
pub mod token_estimator;

pub use models::{GenerationStrategy, SourceContext};
pub use strategy::ContextStrategySelector;
pub use token_budget::{BudgetError, TokenBudgetSplitter};
pub use token_estimator::{
    build_estimator, CharRatioEstimator, TiktokenEstimator, TokenEstimator, WordBasedEstimator,
};
