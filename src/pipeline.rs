use crate::config::XpertConfig;
use crate::context::RequestContext;
use crate::dose_validator::DoseValidator;
use crate::executor::RequestExecutor;
use crate::sample_validator::SampleValidator;
use crate::scheduler::AdjustmentScheduler;
use crate::selector::ModelSelector;
use crate::services::{ComputingService, DrugModelRepository};
use crate::target_validator::TargetValidator;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One stage of the request flow. A stage checks its own preconditions and
/// reports failures through the context error.
pub trait FlowStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn perform(&self, ctx: &mut RequestContext);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    AllRequestsSucceeded,
    SomeRequestsSucceeded,
    NoRequestsSucceeded,
}

pub struct Pipeline {
    steps: Vec<Box<dyn FlowStep>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn FlowStep>>) -> Self {
        Self { steps }
    }

    /// Full flow, from model selection to the computation of the adjustment.
    pub fn general(
        repository: Arc<dyn DrugModelRepository>,
        computing: Arc<dyn ComputingService>,
        config: XpertConfig,
    ) -> Self {
        Self::new(vec![
            Box::new(ModelSelector::new(repository, config.clone())),
            Box::new(DoseValidator),
            Box::new(SampleValidator::new(computing.clone(), config.clone())),
            Box::new(TargetValidator),
            Box::new(AdjustmentScheduler::new(config)),
            Box::new(RequestExecutor::new(computing)),
        ])
    }

    /// Stages that need no computing engine: the request ends with its
    /// adjustment trait built.
    pub fn preparation(repository: Arc<dyn DrugModelRepository>, config: XpertConfig) -> Self {
        Self::new(vec![
            Box::new(ModelSelector::new(repository, config.clone())),
            Box::new(DoseValidator),
            Box::new(TargetValidator),
            Box::new(AdjustmentScheduler::new(config)),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Runs the stages in order and stops at the first failure. Returns
    /// whether the request went through.
    pub fn run(&self, ctx: &mut RequestContext) -> bool {
        let drug_id = ctx.request().drug_id.clone();

        for step in &self.steps {
            if !ctx.should_continue_processing() {
                break;
            }
            log::debug!("[{}] {} started", drug_id, step.name());
            step.perform(ctx);
            if ctx.should_continue_processing() {
                log::debug!("[{}] {} done", drug_id, step.name());
            } else {
                log::error!("[{}] {} failed: {}", drug_id, step.name(), ctx.error());
            }
        }

        ctx.should_continue_processing()
    }

    /// Requests are independent and processed in parallel.
    pub fn run_batch(&self, contexts: &mut [RequestContext]) -> BatchStatus {
        log::info!("Processing {} requests", contexts.len());

        let succeeded = contexts
            .par_iter_mut()
            .map(|ctx| self.run(ctx))
            .filter(|ok| *ok)
            .count();

        log::info!("{} of {} requests succeeded", succeeded, contexts.len());

        if succeeded == contexts.len() {
            BatchStatus::AllRequestsSucceeded
        } else if succeeded > 0 {
            BatchStatus::SomeRequestsSucceeded
        } else {
            BatchStatus::NoRequestsSucceeded
        }
    }
}
