//! Install command - reconcile one component

use console::style;
use foundry_component::InstallOptions;

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, name: &str, options: InstallOptions) -> Result<()> {
    let reconciler = ctx.reconciler(ctx.needs_cluster(name)).await;

    display::step(format!(
        "{} {}{}",
        if options.dry_run { "Planning" } else { "Installing" },
        style(name).cyan(),
        options
            .version
            .as_ref()
            .map(|v| format!(" version {}", style(v).yellow()))
            .unwrap_or_default()
    ));

    let spinner = display::spinner(format!("reconciling {}", name));
    let result = reconciler.install(name, &options).await;
    spinner.finish_and_clear();

    display::print_outcome(&result?);
    Ok(())
}
