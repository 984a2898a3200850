//
// Logging (SPEC_FULL.md §9 "AMBIENT"): `log` facade dispatched through
// `fern`, the stack already declared in the teacher's `Cargo.toml`
// (`log`, `fern`, `tracing`). No single file in the pack wires `fern` up,
// so this follows `fern`'s own documented builder chain.
//
use std::str::FromStr;

use log::LevelFilter;

pub fn init() -> Result<(), fern::InitError> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| LevelFilter::from_str(&s).ok())
        .unwrap_or(if cfg!(debug_assertions) { LevelFilter::Debug } else { LevelFilter::Info });

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // Rocket logs its own request/response lines at `info`; don't drown
        // them out with its internal `debug` chatter.
        .level_for("rocket", LevelFilter::Info)
        .level_for("_", LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}
