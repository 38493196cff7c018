extern crate clap;
use clap::*;

mod cmd_cendet;

fn main() -> anyhow::Result<()> {
    let app = Command::new("cendet")
        .version(crate_version!())
        .about("`cendet` - Centromere detection from repeats and methylation")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .subcommand(cmd_cendet::detect::make_subcommand())
        .subcommand(cmd_cendet::methyl::make_subcommand())
        .after_help(
            r###"Subcommands:

* detect - Call one centromere per chromosome and its kinetochore sites
* methyl - Tabulate mean methylation of repeat blocks, per motif

Annotations come from RepeatMasker GFF; methylation comes from a bedGraph
or bigWig track (bigWig requires the UCSC `bigWigToBedGraph` tool).

"###,
        );

    // Check which subcomamnd the user ran...
    match app.get_matches().subcommand() {
        Some(("detect", sub_matches)) => cmd_cendet::detect::execute(sub_matches),
        Some(("methyl", sub_matches)) => cmd_cendet::methyl::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
