//! Setup reset command - clear the recorded setup state
//!
//! Only the state file changes; hosts and the cluster are left alone, so
//! the next install of each foundational component runs in full again.

use console::style;

use super::{Context, confirm};
use crate::display;
use crate::error::Result;

pub fn run(ctx: &Context, yes: bool) -> Result<()> {
    let mut config = ctx.config.clone();
    let installed = config.setup_state.installed();
    if installed.is_empty() && !config.setup_state.openbao_initialized {
        display::success("Setup state is already empty");
        return Ok(());
    }

    let names: Vec<String> = installed.iter().map(ToString::to_string).collect();
    display::step(format!("Recorded as installed: {}", names.join(", ")));

    if !yes && !confirm("Reset the setup state?")? {
        display::warning("Aborted");
        return Ok(());
    }

    config.setup_state.reset();
    ctx.store.save(&config)?;
    display::success(format!(
        "Setup state reset in {}",
        style(ctx.store.path().display()).dim()
    ));
    Ok(())
}
