use crate::context::RequestContext;
use crate::errors::XpertError;
use crate::pipeline::FlowStep;
use crate::Result;
use std::collections::HashSet;

/// Custom targets must be unique per active moiety and type, and belong to
/// the selected model.
pub struct TargetValidator;

impl TargetValidator {
    fn validate(ctx: &RequestContext) -> Result<()> {
        let treatment = ctx.treatment().ok_or(XpertError::MissingTreatment)?;
        let model = ctx.drug_model().ok_or(XpertError::MissingDrugModel)?;

        let mut seen = HashSet::new();
        for target in &treatment.targets {
            if !seen.insert((target.active_moiety_id.as_str(), target.target_type)) {
                return Err(XpertError::DuplicateTarget);
            }
        }

        if let Some(foreign) = treatment
            .targets
            .iter()
            .find(|target| !model.has_active_moiety(&target.active_moiety_id))
        {
            log::warn!("Target active moiety {} unknown to {}", foreign.active_moiety_id, model.id);
            return Err(XpertError::ForeignTarget(model.id.clone()));
        }

        Ok(())
    }
}

impl FlowStep for TargetValidator {
    fn name(&self) -> &'static str {
        "target validation"
    }

    fn perform(&self, ctx: &mut RequestContext) {
        if let Err(e) = Self::validate(ctx) {
            ctx.set_error(e.to_string());
        }
    }
}
