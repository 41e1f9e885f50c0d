//! Status command - live state of one component

use console::style;
use foundry_component::Substrate;

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, name: &str) -> Result<()> {
    let component = ctx.registry.require(name)?;
    let spec = component.spec();

    if let Some(flag) = spec.state_flag {
        let recorded = if ctx.config.setup_state.is_set(flag) {
            style("installed").green()
        } else {
            style("not installed").dim()
        };
        println!("{} {} ({})", style("recorded:").dim(), recorded, flag);
    }

    let reconciler = ctx
        .reconciler(spec.substrate == Substrate::Kubernetes)
        .await;
    let status = reconciler.status(name).await?;
    display::print_status(name, &status);
    Ok(())
}
