use indexmap::IndexMap;
use log::warn;
use std::io::BufRead;
use thiserror::Error;

/// The UCSC extractor used for `.bw` inputs; looked up on PATH.
pub const BIGWIG_TO_BEDGRAPH: &str = "bigWigToBedGraph";

//----------------------------
// SignalSample
//----------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSample {
    pub position: u64,
    pub value: f64,
}

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("region {chrom}:{start}-{end} unavailable: {reason}")]
    RegionUnavailable {
        chrom: String,
        start: u64,
        end: u64,
        reason: String,
    },

    #[error("malformed signal record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A per-base signal track answering region queries.
///
/// `fetch` returns the samples overlapping `[start, end)` in ascending
/// position order. An empty vector is a valid answer (the region is covered
/// by the track but holds no records); `RegionUnavailable` means the track
/// cannot answer for this region at all. Callers must not substitute a
/// default sample for either case.
pub trait SignalSource {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<SignalSample>, SignalError>;
}

//----------------------------
// Format sniffing
//----------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFormat {
    BigWig,
    BedGraph,
}

impl SignalFormat {
    /// Decide the provider from the file name. A trailing `.gz` is accepted
    /// on bedGraph only; the bigWig extractor reads its input uncompressed.
    ///
    /// ```
    /// # use cendet::libs::signal::SignalFormat;
    /// assert_eq!(SignalFormat::from_path("meth.bw"), Some(SignalFormat::BigWig));
    /// assert_eq!(SignalFormat::from_path("meth.bedgraph.gz"), Some(SignalFormat::BedGraph));
    /// assert_eq!(SignalFormat::from_path("meth.bw.gz"), None);
    /// assert_eq!(SignalFormat::from_path("meth.bam"), None);
    /// ```
    pub fn from_path(path: &str) -> Option<SignalFormat> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".bw") || lower.ends_with(".bigwig") {
            return Some(SignalFormat::BigWig);
        }
        let base = lower.strip_suffix(".gz").unwrap_or(lower.as_str());
        if base.ends_with(".bedgraph") || base.ends_with(".bg") {
            Some(SignalFormat::BedGraph)
        } else {
            None
        }
    }
}

/// Parse one 4-column BedGraph record: chrom, start, end, value.
fn parse_bedgraph_line(line: &str) -> Result<(String, u64, u64, f64), SignalError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(SignalError::Malformed(format!(
            "needs 4 columns (chrom, start, end, value): {}",
            line
        )));
    }

    let start: u64 = fields[1]
        .parse()
        .map_err(|e| SignalError::Malformed(format!("invalid start `{}`: {}", fields[1], e)))?;
    let end: u64 = fields[2]
        .parse()
        .map_err(|e| SignalError::Malformed(format!("invalid end `{}`: {}", fields[2], e)))?;
    if end <= start {
        return Err(SignalError::Malformed(format!(
            "invalid interval {}:{}-{}",
            fields[0], start, end
        )));
    }
    let value: f64 = fields[3]
        .parse()
        .map_err(|e| SignalError::Malformed(format!("invalid value `{}`: {}", fields[3], e)))?;

    Ok((fields[0].to_string(), start, end, value))
}

//----------------------------
// BedGraphTrack
//----------------------------

/// An extracted signal track held in memory, grouped per chromosome and
/// sorted by start so region queries are a binary search away.
pub struct BedGraphTrack {
    records: IndexMap<String, Vec<(u64, u64, f64)>>,
}

impl BedGraphTrack {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, u64, u64, f64)>,
    {
        let mut per_chrom: IndexMap<String, Vec<(u64, u64, f64)>> = IndexMap::new();
        for (chrom, start, end, value) in records {
            per_chrom.entry(chrom).or_default().push((start, end, value));
        }
        for recs in per_chrom.values_mut() {
            recs.sort_by_key(|r| r.0);
        }
        Self { records: per_chrom }
    }

    /// Load a BedGraph file (`.gz` supported). Malformed lines are skipped
    /// with a warning; a track without a single usable record is an error.
    pub fn load(input: &str) -> anyhow::Result<Self> {
        let mut records = Vec::new();
        for (i, line) in crate::reader(input).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("track") {
                continue;
            }
            match parse_bedgraph_line(trimmed) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!("{}: line {} skipped: {}", input, i + 1, e),
            }
        }
        if records.is_empty() {
            anyhow::bail!("no usable records in signal track {}", input);
        }

        Ok(Self::from_records(records))
    }

    pub fn num_records(&self) -> usize {
        self.records.values().map(|v| v.len()).sum()
    }
}

impl SignalSource for BedGraphTrack {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<SignalSample>, SignalError> {
        let recs =
            self.records
                .get(chrom)
                .ok_or_else(|| SignalError::RegionUnavailable {
                    chrom: chrom.to_string(),
                    start,
                    end,
                    reason: "chromosome not present in track".to_string(),
                })?;

        // An empty span holds no samples, as with the bigWig extractor.
        if start >= end {
            return Ok(Vec::new());
        }

        // Records are sorted and non-overlapping, so ends are monotonic too.
        let first = recs.partition_point(|r| r.1 <= start);
        let samples = recs[first..]
            .iter()
            .take_while(|r| r.0 < end)
            .map(|r| SignalSample {
                position: r.0.max(start),
                value: r.2,
            })
            .collect();

        Ok(samples)
    }
}

//----------------------------
// BigWigFile
//----------------------------

/// A BigWig track queried through `bigWigToBedGraph`, one extraction per
/// region into a temporary file that is removed on every exit path.
pub struct BigWigFile {
    path: std::path::PathBuf,
}

impl BigWigFile {
    pub fn new<P: Into<std::path::PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl SignalSource for BigWigFile {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<SignalSample>, SignalError> {
        let tmp = tempfile::NamedTempFile::new()?;

        let output = std::process::Command::new(BIGWIG_TO_BEDGRAPH)
            .arg(&self.path)
            .arg(tmp.path())
            .arg(format!("-chrom={}", chrom))
            .arg(format!("-start={}", start))
            .arg(format!("-end={}", end))
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("{} exited with {}", BIGWIG_TO_BEDGRAPH, output.status)
            } else {
                stderr
            };
            return Err(SignalError::RegionUnavailable {
                chrom: chrom.to_string(),
                start,
                end,
                reason,
            });
        }

        let text = std::fs::read_to_string(tmp.path())?;
        let mut samples = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (_, rec_start, _, value) = parse_bedgraph_line(trimmed)?;
            samples.push(SignalSample {
                position: rec_start,
                value,
            });
        }

        Ok(samples)
    }
}

/// Open a signal file, picking the provider from its extension.
///
/// BigWig input needs the UCSC converter on PATH; that is checked here once
/// so the failure surfaces before any region is fetched.
pub fn open_signal(path: &str) -> anyhow::Result<Box<dyn SignalSource + Sync>> {
    match SignalFormat::from_path(path) {
        Some(SignalFormat::BigWig) => {
            if which::which(BIGWIG_TO_BEDGRAPH).is_err() {
                anyhow::bail!(
                    "{} not found in PATH. Please install the UCSC kent tools first.",
                    BIGWIG_TO_BEDGRAPH
                );
            }
            Ok(Box::new(BigWigFile::new(path)))
        }
        Some(SignalFormat::BedGraph) => Ok(Box::new(BedGraphTrack::load(path)?)),
        None => {
            let lower = path.to_ascii_lowercase();
            if lower.ends_with(".bw.gz") || lower.ends_with(".bigwig.gz") {
                anyhow::bail!(
                    "{} is a gzipped bigWig; {} cannot read it, decompress the file first",
                    path,
                    BIGWIG_TO_BEDGRAPH
                );
            }
            anyhow::bail!(
                "cannot tell the signal format of {} from its extension; expected .bw, .bigwig, .bedgraph or .bg",
                path
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(SignalFormat::from_path("meth.bw"), Some(SignalFormat::BigWig));
        assert_eq!(
            SignalFormat::from_path("METH.BigWig"),
            Some(SignalFormat::BigWig)
        );
        assert_eq!(
            SignalFormat::from_path("meth.bg.gz"),
            Some(SignalFormat::BedGraph)
        );

        // gz applies to bedGraph only
        assert_eq!(SignalFormat::from_path("meth.bw.gz"), None);
        assert_eq!(SignalFormat::from_path("meth.bigwig.gz"), None);
    }

    #[test]
    fn test_open_signal_gzipped_bigwig() {
        let err = match open_signal("meth.bw.gz") {
            Ok(_) => panic!("gzipped bigWig must be rejected"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("decompress"));
    }

    #[test]
    fn test_parse_bedgraph_line() {
        let (chrom, start, end, value) = parse_bedgraph_line("chr1\t1200\t1250\t0.16").unwrap();
        assert_eq!(chrom, "chr1");
        assert_eq!(start, 1200);
        assert_eq!(end, 1250);
        assert_eq!(value, 0.16);

        assert!(parse_bedgraph_line("chr1\t1200\t1250").is_err());
        assert!(parse_bedgraph_line("chr1\tx\t1250\t0.16").is_err());
        assert!(parse_bedgraph_line("chr1\t1250\t1200\t0.16").is_err());
        assert!(parse_bedgraph_line("chr1\t1200\t1250\tlow").is_err());
    }

    #[test]
    fn test_track_fetch() {
        let track = BedGraphTrack::from_records(vec![
            ("chr1".to_string(), 1500, 1550, 0.02),
            ("chr1".to_string(), 1200, 1250, 0.16),
            ("chr1".to_string(), 2500, 2550, 0.09),
            ("chr3".to_string(), 100, 200, 0.5),
        ]);

        let samples = track.fetch("chr1", 1000, 3000).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].position, 1200);
        assert_eq!(samples[1].position, 1500);
        assert_eq!(samples[2].position, 2500);

        // record straddling the query start is clipped to it
        let samples = track.fetch("chr1", 1230, 1600).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].position, 1230);
        assert_eq!(samples[0].value, 0.16);

        // covered chromosome, no overlapping record
        let samples = track.fetch("chr3", 2000, 4000).unwrap();
        assert!(samples.is_empty());

        // chromosome missing from the track
        let err = track.fetch("chr4", 0, 1000).unwrap_err();
        assert!(matches!(err, SignalError::RegionUnavailable { .. }));
    }

    #[test]
    fn test_fetch_zero_width() {
        let track = BedGraphTrack::from_records(vec![("chr1".to_string(), 1200, 1250, 0.16)]);

        // a straddling record must not surface for an empty span
        assert!(track.fetch("chr1", 1230, 1230).unwrap().is_empty());
        assert!(track.fetch("chr1", 1250, 1230).unwrap().is_empty());

        // the chromosome lookup still comes first
        let err = track.fetch("chr2", 5, 5).unwrap_err();
        assert!(matches!(err, SignalError::RegionUnavailable { .. }));
    }

    #[test]
    fn test_track_load() {
        let track = BedGraphTrack::load("tests/cendet/signal.bedgraph").unwrap();
        assert_eq!(track.num_records(), 10);

        let samples = track.fetch("chr1", 1000, 3000).unwrap();
        assert_eq!(samples.len(), 5);
    }
}
