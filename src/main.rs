//! PV Engine - Headless Display Runner
//!
//! Loads a display document, runs the engine for the configured number of
//! ticks and prints the resulting PV values and widget properties.
//!
//! ```text
//! pvengine-rs <display.toml> [ticks]
//! ```

use anyhow::{bail, Context};
use pvengine_rs::{widget::Widget, DisplayDocument, EngineConfig, PvEngine};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pvengine_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: pvengine-rs <display.toml|display.json> [ticks]");
    };
    let ticks_override = args
        .next()
        .map(|t| t.parse::<u32>().with_context(|| format!("invalid tick count '{}'", t)))
        .transpose()?;

    let config = EngineConfig::load_or_default();
    let document = DisplayDocument::load(&path).with_context(|| format!("loading {}", path))?;
    let ticks = ticks_override.unwrap_or(document.run.ticks);
    let period = document.run.tick_period();

    tracing::info!("Running {} for {} tick(s) of {:?}", path, ticks, period);

    let mut engine = PvEngine::new(config);
    let display = document
        .instantiate(&mut engine)
        .with_context(|| format!("instantiating {}", path))?;

    let mut clock = Duration::ZERO;
    let mut redraws = 0u32;
    for _ in 0..ticks {
        if engine.step(clock) {
            redraws += 1;
        }
        for error in engine.take_errors() {
            tracing::warn!("{}", error);
        }
        clock += period;
    }
    tracing::info!("{} of {} tick(s) changed the display", redraws, ticks);

    println!("== PVs ==");
    let mut names: Vec<&str> = engine.state().pv_names().collect();
    names.sort_unstable();
    for name in names {
        if let Some(pv) = engine.pv_by_name(name) {
            println!("{:<40} {:<20} {}", name, pv.formatted(), pv.severity());
        }
    }

    println!("== Widgets ==");
    for (decl, (name, widget)) in document.widgets.iter().zip(&display.widgets) {
        let widget = widget
            .read()
            .map_err(|e| anyhow::anyhow!("widget '{}' lock poisoned: {}", name, e))?;
        println!("{}", widget.name());
        for property in decl.properties.keys() {
            if let Some(value) = widget.get_property(property) {
                println!("  {:<38} {}", property, value);
            }
        }
    }

    println!("== Traces ==");
    for (name, id) in &display.traces {
        if let Some(trace) = engine.trace(*id) {
            let ys: Vec<String> = trace.snapshot().iter().map(|p| p.y.to_string()).collect();
            println!("{:<40} [{}]", name, ys.join(", "));
        }
    }

    Ok(())
}
