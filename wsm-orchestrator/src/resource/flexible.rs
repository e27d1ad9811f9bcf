use super::ResourceHandler;
use crate::error::Result;
use crate::flight::FlightPlan;
use crate::model::{ResourceType, WsmResource};

/// Opaque application data with no cloud footprint.
pub struct FlexibleResourceHandler;

impl ResourceHandler for FlexibleResourceHandler {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ControlledFlexibleResource
    }

    fn add_create_steps(&self, _plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        Ok(())
    }

    fn add_delete_steps(&self, _plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        Ok(())
    }
}
