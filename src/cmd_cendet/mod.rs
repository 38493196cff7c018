//! Subcommand modules for the `cendet` binary.

pub mod detect;
pub mod methyl;

/// Set up the global logger; `RUST_LOG` overrides the verbosity flag.
pub fn init_logger(verbose: bool) -> anyhow::Result<()> {
    let mut builder = pretty_env_logger::formatted_builder();

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    } else {
        let level = if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        builder.filter_level(level);
    }

    builder.try_init()?;
    Ok(())
}
