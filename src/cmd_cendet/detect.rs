use clap::*;
use log::info;

use cendet::libs::centromere::{detect_centromeres, BlockIndex};
use cendet::libs::gff;
use cendet::libs::signal::open_signal;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("detect")
        .about("Detect centromeres from repeat annotations and a methylation track")
        .after_help(
            r###"
On each chromosome, the candidate repeat block with the lowest mean
methylation becomes the centromere call. Within the winning block, samples
far below that mean (value < mean * --dip-ratio) are emitted as kinetochore
binding sites, one GFF line per sample.

Notes:
* <repeats.gff> follows RepeatMasker conventions; blocks whose attribute
  column mentions --motif are the candidates.
* <signal> is a methylation track, either bedGraph (.bedgraph/.bg, plain or
  gzipped) or bigWig (.bw/.bigwig). Reading bigWig requires the UCSC
  `bigWigToBedGraph` tool in PATH.
* Blocks shorter than --min-length are dropped up front, candidates or not.
* A candidate region without any overlapping signal is skipped with a
  warning, never scored as zero.
* Chromosomes are processed in the order they first appear in the input.

Examples:
1. Call centromeres with defaults:
   cendet detect repeats.gff methylation.bedgraph -o centromeres.gff

2. Another species' motif, stricter dips:
   cendet detect repeats.gff track.bw --motif Cent186 --dip-ratio 0.5
"###,
        )
        .arg(
            Arg::new("infile")
                .required(true)
                .num_args(1)
                .index(1)
                .help("Input GFF file of repeat blocks. [stdin] for standard input"),
        )
        .arg(
            Arg::new("signal")
                .required(true)
                .num_args(1)
                .index(2)
                .help("Methylation signal track (bedGraph or bigWig)"),
        )
        .arg(
            Arg::new("motif")
                .long("motif")
                .num_args(1)
                .default_value("Tgut716A")
                .help("Repeat motif marking candidate blocks"),
        )
        .arg(
            Arg::new("min_length")
                .long("min-length")
                .value_parser(value_parser!(u64))
                .num_args(1)
                .default_value("1000")
                .help("Minimal block length in bp"),
        )
        .arg(
            Arg::new("dip_ratio")
                .long("dip-ratio")
                .value_parser(value_parser!(f64))
                .num_args(1)
                .default_value("0.7")
                .help("Fraction of the block mean below which a sample is a dip"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .short('p')
                .value_parser(value_parser!(usize))
                .num_args(1)
                .default_value("4")
                .help("Number of parallel threads"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Verbose mode, report per-candidate means"),
        )
        .arg(
            Arg::new("outfile")
                .short('o')
                .long("outfile")
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    crate::cmd_cendet::init_logger(args.get_flag("verbose"))?;

    let infile = args.get_one::<String>("infile").unwrap();
    let signal_file = args.get_one::<String>("signal").unwrap();
    let motif = args.get_one::<String>("motif").unwrap();
    let min_length = *args.get_one::<u64>("min_length").unwrap();
    let dip_ratio = *args.get_one::<f64>("dip_ratio").unwrap();
    let parallel = *args.get_one::<usize>("parallel").unwrap();

    if motif.is_empty() {
        anyhow::bail!("--motif must not be empty");
    }
    if !dip_ratio.is_finite() || dip_ratio < 0.0 {
        anyhow::bail!("--dip-ratio must be finite and non-negative");
    }

    let source = open_signal(signal_file)?;

    let index = BlockIndex::from_gff(cendet::reader(infile), motif, min_length);
    info!(
        "{} blocks pass the length filter, {} carry motif {}",
        index.num_blocks(),
        index.num_candidates(),
        motif
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel)
        .build()
        .unwrap();
    let results = pool.install(|| detect_centromeres(&index, source.as_ref(), dip_ratio));

    //----------------------------
    // Output
    //----------------------------
    let mut writer = cendet::writer(args.get_one::<String>("outfile").unwrap());

    for (selection, sites) in &results {
        let block = &selection.block;
        gff::write_centromere(
            &mut writer,
            &block.chrom,
            block.start,
            block.end,
            &block.attributes,
            selection.mean_signal,
        )?;
        for site in sites {
            gff::write_kinetochore_site(&mut writer, &block.chrom, site.position, site.value)?;
        }
    }

    info!(
        "{} centromeres called, {} kinetochore sites",
        results.len(),
        results.iter().map(|(_, sites)| sites.len()).sum::<usize>()
    );

    Ok(())
}
