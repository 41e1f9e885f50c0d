//! Uninstall command - remove a cluster component

use console::style;

use super::{Context, confirm};
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, name: &str, yes: bool) -> Result<()> {
    ctx.registry.require(name)?;

    if !yes && !confirm(&format!("Uninstall {}?", name))? {
        display::warning("Aborted");
        return Ok(());
    }

    display::step(format!("Uninstalling {}", style(name).cyan()));
    ctx.reconciler(true).await.uninstall(name).await?;
    display::success(format!("{} uninstalled", style(name).cyan()));
    Ok(())
}
