//! List command - registered components and their recorded state

use super::Context;
use crate::display;
use crate::error::Result;

pub fn run(ctx: &Context) -> Result<()> {
    let rows: Vec<_> = ctx
        .registry
        .specs()
        .into_iter()
        .map(|spec| {
            let recorded = spec
                .state_flag
                .map(|flag| ctx.config.setup_state.is_set(flag));
            (spec, recorded)
        })
        .collect();

    display::print_component_table(&rows);
    Ok(())
}
