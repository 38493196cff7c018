use clap::*;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{info, warn};
use rayon::prelude::*;
use std::io::Write;

use cendet::libs::centromere::region_mean;
use cendet::libs::gff::GffReader;
use cendet::libs::signal::open_signal;

struct Row {
    motif: String,
    chrom: String,
    start: u64,
    end: u64,
    mean: f64,
}

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("methyl")
        .about("Report mean methylation of repeat blocks, per motif")
        .after_help(
            r###"
Scans the annotation for blocks of the given motifs, computes the mean
methylation over each block and writes one TSV row per block.

Output columns:
    motif, chrom, start, end, avg_methylation, match_type

With --select-best, rows are grouped per motif and chromosome and sorted by
ascending methylation; the lowest row is tagged `best`, the remainder
`other`. Without it rows keep the input order and the tag column is `.`.

Notes:
* --motif may be repeated; a block counts only when its Target name equals
  one of the motifs exactly.
* Regions without methylation data are reported to stderr and skipped.

Examples:
1. Both default motifs:
   cendet methyl repeats.gff methylation.bw -o methyl.tsv

2. Pick the best block per chromosome:
   cendet methyl repeats.gff methylation.bedgraph --select-best
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
                .action(ArgAction::Append)
                .default_values(["Tgut716A", "Tgut191A"])
                .help("Repeat motif(s) to report; may be repeated"),
        )
        .arg(
            Arg::new("min_length")
                .long("min-length")
                .value_parser(value_parser!(u64))
                .num_args(1)
                .default_value("0")
                .help("Minimal block length in bp"),
        )
        .arg(
            Arg::new("select_best")
                .long("select-best")
                .action(ArgAction::SetTrue)
                .help("Tag the lowest-methylation block per motif and chromosome"),
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
                .help("Verbose mode"),
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
    let motifs: Vec<String> = args.get_many::<String>("motif").unwrap().cloned().collect();
    let min_length = *args.get_one::<u64>("min_length").unwrap();
    let select_best = args.get_flag("select_best");
    let parallel = *args.get_one::<usize>("parallel").unwrap();

    let source = open_signal(signal_file)?;

    //----------------------------
    // Matching regions, input order
    //----------------------------
    let mut regions: Vec<(String, String, u64, u64)> = Vec::new();
    for result in GffReader::new(cendet::reader(infile)) {
        let rec = match result {
            Ok(rec) => rec,
            Err(e) => {
                warn!("annotation record skipped: {}", e);
                continue;
            }
        };
        let Some(name) = rec.target_name() else {
            continue;
        };
        if !motifs.iter().any(|m| *m == name) {
            continue;
        }
        if rec.length() < min_length {
            continue;
        }
        regions.push((name, rec.chrom, rec.start, rec.end));
    }
    info!("{} blocks match {} motif(s)", regions.len(), motifs.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel)
        .build()
        .unwrap();
    let rows: Vec<Row> = pool.install(|| {
        regions
            .par_iter()
            .filter_map(|(motif, chrom, start, end)| {
                let samples = match source.fetch(chrom, *start, *end) {
                    Ok(samples) => samples,
                    Err(e) => {
                        warn!("{}:{}-{} skipped: {}", chrom, start, end, e);
                        return None;
                    }
                };
                let mean = match region_mean(&samples) {
                    Some(mean) if mean.is_finite() => mean,
                    _ => {
                        warn!("no methylation data for {} in {}:{}-{}", motif, chrom, start, end);
                        return None;
                    }
                };
                Some(Row {
                    motif: motif.clone(),
                    chrom: chrom.clone(),
                    start: *start,
                    end: *end,
                    mean,
                })
            })
            .collect()
    });

    //----------------------------
    // Output
    //----------------------------
    let mut writer = cendet::writer(args.get_one::<String>("outfile").unwrap());
    writer.write_all(b"#motif\tchrom\tstart\tend\tavg_methylation\tmatch_type\n")?;

    if select_best {
        for motif in &motifs {
            let mut per_chrom: IndexMap<&str, Vec<&Row>> = IndexMap::new();
            for row in rows.iter().filter(|r| &r.motif == motif) {
                per_chrom.entry(row.chrom.as_str()).or_default().push(row);
            }
            for (_, group) in per_chrom {
                let sorted: Vec<&Row> = group
                    .into_iter()
                    .sorted_by(|a, b| a.mean.total_cmp(&b.mean))
                    .collect();
                for (i, row) in sorted.iter().enumerate() {
                    let tag = if i == 0 { "best" } else { "other" };
                    write_row(&mut writer, row, tag)?;
                }
            }
        }
    } else {
        for row in &rows {
            write_row(&mut writer, row, ".")?;
        }
    }

    Ok(())
}

fn write_row<W: Write>(writer: &mut W, row: &Row, tag: &str) -> std::io::Result<()> {
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}",
        row.motif, row.chrom, row.start, row.end, row.mean, tag
    )
}
