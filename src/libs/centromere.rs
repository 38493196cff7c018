use indexmap::IndexMap;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::io::BufRead;

use crate::libs::gff::GffReader;
use crate::libs::signal::{SignalSample, SignalSource};

//----------------------------
// AnnotationBlock
//----------------------------

/// One repeat block from the annotation, tagged at load time.
#[derive(Debug, Clone)]
pub struct AnnotationBlock {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub attributes: String,
    pub is_candidate: bool,
}

impl AnnotationBlock {
    pub fn length(&self) -> u64 {
        self.end - self.start
    }
}

//----------------------------
// BlockIndex
//----------------------------

/// Annotation blocks grouped per chromosome, in input order.
///
/// Blocks shorter than `min_length` are dropped on load, candidate or not;
/// malformed records are skipped with a warning. Chromosomes keep their
/// first-seen order so downstream selection is reproducible.
pub struct BlockIndex {
    per_chrom: IndexMap<String, Vec<AnnotationBlock>>,
}

impl BlockIndex {
    pub fn from_gff<R: BufRead>(input: R, motif: &str, min_length: u64) -> Self {
        let mut per_chrom: IndexMap<String, Vec<AnnotationBlock>> = IndexMap::new();

        for result in GffReader::new(input) {
            let rec = match result {
                Ok(rec) => rec,
                Err(e) => {
                    warn!("annotation record skipped: {}", e);
                    continue;
                }
            };
            if rec.length() < min_length {
                continue;
            }

            let is_candidate = rec.has_token(motif);
            if is_candidate {
                debug!("Found {} block in {}:{}-{}", motif, rec.chrom, rec.start, rec.end);
            }

            per_chrom
                .entry(rec.chrom.clone())
                .or_default()
                .push(AnnotationBlock {
                    chrom: rec.chrom,
                    start: rec.start,
                    end: rec.end,
                    attributes: rec.attributes,
                    is_candidate,
                });
        }

        Self { per_chrom }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AnnotationBlock])> {
        self.per_chrom
            .iter()
            .map(|(chrom, blocks)| (chrom.as_str(), blocks.as_slice()))
    }

    pub fn num_blocks(&self) -> usize {
        self.per_chrom.values().map(|v| v.len()).sum()
    }

    pub fn num_candidates(&self) -> usize {
        self.per_chrom
            .values()
            .flatten()
            .filter(|b| b.is_candidate)
            .count()
    }
}

//----------------------------
// Selection
//----------------------------

#[derive(Debug, Clone)]
pub struct CentromereSelection {
    pub block: AnnotationBlock,
    pub mean_signal: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinetochoreSite {
    pub position: u64,
    pub value: f64,
}

/// Arithmetic mean over the samples, `None` when there are none.
///
/// A region without samples must stay incomparable; coercing it to 0 would
/// let it win the selection against any real methylation level.
///
/// ```
/// # use cendet::libs::centromere::region_mean;
/// # use cendet::libs::signal::SignalSample;
/// assert_eq!(region_mean(&[]), None);
/// let samples = [SignalSample { position: 10, value: 0.2 }];
/// assert_eq!(region_mean(&samples), Some(0.2));
/// ```
pub fn region_mean(samples: &[SignalSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64)
}

/// Pick the candidate block with the lowest mean signal on one chromosome.
///
/// A block whose region fetch fails or returns no samples is ineligible and
/// is skipped with a warning. Exact ties keep the first-encountered block.
/// Returns the selection together with the winner's samples so the dip scan
/// does not fetch the region a second time.
pub fn select_centromere<S>(
    chrom: &str,
    blocks: &[AnnotationBlock],
    source: &S,
) -> Option<(CentromereSelection, Vec<SignalSample>)>
where
    S: SignalSource + ?Sized,
{
    let mut best: Option<(CentromereSelection, Vec<SignalSample>)> = None;

    for block in blocks.iter().filter(|b| b.is_candidate) {
        let samples = match source.fetch(&block.chrom, block.start, block.end) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(
                    "candidate {}:{}-{} skipped: {}",
                    block.chrom, block.start, block.end, e
                );
                continue;
            }
        };

        let mean = match region_mean(&samples) {
            Some(mean) if mean.is_finite() => mean,
            Some(mean) => {
                warn!(
                    "candidate {}:{}-{} skipped: non-finite mean {}",
                    block.chrom, block.start, block.end, mean
                );
                continue;
            }
            None => {
                warn!(
                    "candidate {}:{}-{} skipped: no signal samples",
                    block.chrom, block.start, block.end
                );
                continue;
            }
        };
        debug!("{}:{}-{} mean signal {}", block.chrom, block.start, block.end, mean);

        let replace = match &best {
            None => true,
            Some((current, _)) => mean < current.mean_signal,
        };
        if replace {
            best = Some((
                CentromereSelection {
                    block: block.clone(),
                    mean_signal: mean,
                },
                samples,
            ));
        }
    }

    if best.is_none() {
        info!("{}: no eligible centromere candidate", chrom);
    }
    best
}

/// Scan the selected block's samples for hypomethylation dips.
///
/// Every sample strictly below `mean_signal * dip_ratio` becomes one site;
/// adjacent qualifying samples are not merged. A non-positive threshold
/// legitimately yields no sites.
pub fn find_dip_sites(
    selection: &CentromereSelection,
    samples: &[SignalSample],
    dip_ratio: f64,
) -> Vec<KinetochoreSite> {
    let threshold = selection.mean_signal * dip_ratio;

    samples
        .iter()
        .filter(|s| s.value < threshold)
        .map(|s| KinetochoreSite {
            position: s.position,
            value: s.value,
        })
        .collect()
}

/// Run selection and dip detection for every chromosome of the index.
///
/// Chromosomes share no state and are evaluated on the current rayon pool;
/// results come back in the index's chromosome order regardless of thread
/// count. Chromosomes without an eligible candidate are omitted.
pub fn detect_centromeres<S>(
    index: &BlockIndex,
    source: &S,
    dip_ratio: f64,
) -> Vec<(CentromereSelection, Vec<KinetochoreSite>)>
where
    S: SignalSource + Sync + ?Sized,
{
    let per_chrom: Vec<(&str, &[AnnotationBlock])> = index.iter().collect();

    per_chrom
        .par_iter()
        .filter_map(|(chrom, blocks)| {
            select_centromere(chrom, blocks, source).map(|(selection, samples)| {
                let sites = find_dip_sites(&selection, &samples, dip_ratio);
                (selection, sites)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::signal::BedGraphTrack;
    use approx::assert_relative_eq;

    fn block(chrom: &str, start: u64, end: u64, is_candidate: bool) -> AnnotationBlock {
        AnnotationBlock {
            chrom: chrom.to_string(),
            start,
            end,
            attributes: format!("Target \"Motif:Tgut716A\" 1 {}", end - start + 1),
            is_candidate,
        }
    }

    fn chr1_track() -> BedGraphTrack {
        BedGraphTrack::from_records(vec![
            ("chr1".to_string(), 1200, 1250, 0.16),
            ("chr1".to_string(), 1500, 1550, 0.02),
            ("chr1".to_string(), 1800, 1850, 0.03),
            ("chr1".to_string(), 2100, 2150, 0.20),
            ("chr1".to_string(), 2500, 2550, 0.09),
            ("chr1".to_string(), 5100, 5200, 0.30),
            ("chr1".to_string(), 5500, 5600, 0.40),
        ])
    }

    #[test]
    fn test_region_mean() {
        assert_eq!(region_mean(&[]), None);

        let samples: Vec<SignalSample> = [0.16, 0.02, 0.03, 0.20, 0.09]
            .iter()
            .enumerate()
            .map(|(i, &value)| SignalSample {
                position: i as u64,
                value,
            })
            .collect();
        assert_relative_eq!(region_mean(&samples).unwrap(), 0.1, max_relative = 1e-12);
    }

    #[test]
    fn test_select_lowest_mean() {
        let track = chr1_track();
        let blocks = vec![block("chr1", 1000, 3000, true), block("chr1", 5000, 6000, true)];

        let (selection, samples) = select_centromere("chr1", &blocks, &track).unwrap();
        assert_eq!(selection.block.start, 1000);
        assert_eq!(selection.block.end, 3000);
        assert_relative_eq!(selection.mean_signal, 0.1, max_relative = 1e-12);
        assert_eq!(samples.len(), 5);
    }

    #[test]
    fn test_select_ignores_non_candidates() {
        let track = chr1_track();
        // the lower-mean block is not a candidate
        let blocks = vec![block("chr1", 1000, 3000, false), block("chr1", 5000, 6000, true)];

        let (selection, _) = select_centromere("chr1", &blocks, &track).unwrap();
        assert_eq!(selection.block.start, 5000);
        assert_relative_eq!(selection.mean_signal, 0.35, max_relative = 1e-12);
    }

    #[test]
    fn test_select_tie_first_wins() {
        let track = BedGraphTrack::from_records(vec![
            ("chr1".to_string(), 100, 150, 0.2),
            ("chr1".to_string(), 300, 350, 0.2),
        ]);
        let blocks = vec![block("chr1", 100, 200, true), block("chr1", 300, 400, true)];

        let (selection, _) = select_centromere("chr1", &blocks, &track).unwrap();
        assert_eq!(selection.block.start, 100);
    }

    #[test]
    fn test_select_empty_region_ineligible() {
        let track = BedGraphTrack::from_records(vec![("chr3".to_string(), 100, 200, 0.5)]);

        // covered chromosome, but nothing overlaps the candidate
        let blocks = vec![block("chr3", 2000, 4000, true)];
        assert!(select_centromere("chr3", &blocks, &track).is_none());

        // chromosome absent from the track entirely
        let blocks = vec![block("chr4", 100, 1500, true)];
        assert!(select_centromere("chr4", &blocks, &track).is_none());

        // an empty region must not shadow a real one
        let blocks = vec![
            block("chr3", 2000, 4000, true),
            block("chr3", 50, 1100, true),
        ];
        let (selection, _) = select_centromere("chr3", &blocks, &track).unwrap();
        assert_eq!(selection.block.start, 50);
        assert_relative_eq!(selection.mean_signal, 0.5, max_relative = 1e-12);
    }

    #[test]
    fn test_find_dip_sites() {
        let track = chr1_track();
        let blocks = vec![block("chr1", 1000, 3000, true)];
        let (selection, samples) = select_centromere("chr1", &blocks, &track).unwrap();

        let sites = find_dip_sites(&selection, &samples, 0.7);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].position, 1500);
        assert_eq!(sites[0].value, 0.02);
        assert_eq!(sites[1].position, 1800);
        assert_eq!(sites[1].value, 0.03);
    }

    #[test]
    fn test_find_dip_sites_zero_ratio() {
        let selection = CentromereSelection {
            block: block("chr1", 1000, 3000, true),
            mean_signal: 0.1,
        };
        let samples = [
            SignalSample { position: 1500, value: 0.0 },
            SignalSample { position: 1800, value: 0.03 },
        ];
        assert!(find_dip_sites(&selection, &samples, 0.0).is_empty());
    }

    #[test]
    fn test_find_dip_sites_zero_mean() {
        let selection = CentromereSelection {
            block: block("chr1", 1000, 3000, true),
            mean_signal: 0.0,
        };
        let samples = [SignalSample { position: 1500, value: 0.0 }];
        assert!(find_dip_sites(&selection, &samples, 0.7).is_empty());
    }

    #[test]
    fn test_index_filters_and_tags() {
        let gff = "\
##gff-version 3
chr1\tRepeatMasker\tsimilarity\t1000\t3000\t2.8\t+\t.\tTarget \"Motif:Tgut716A\" 1 2001
chr1\tRepeatMasker\tsimilarity\t8000\t8200\t12.5\t-\t.\tTarget \"Motif:Tgut191A\" 1 201
chr2\tRepeatMasker\tsimilarity\t1500\t1900\t3.9\t+\t.\tTarget \"Motif:Tgut716A\" 1 401
chr5\tRepeatMasker\tsimilarity\tabc\t900\t.\t+\t.\tTarget \"Motif:Tgut716A\" 1 800
";
        let index = BlockIndex::from_gff(gff.as_bytes(), "Tgut716A", 1000);

        // chr1 8000-8200 and chr2 1500-1900 fall below min_length; chr5 is malformed
        assert_eq!(index.num_blocks(), 1);
        assert_eq!(index.num_candidates(), 1);

        let (chrom, blocks) = index.iter().next().unwrap();
        assert_eq!(chrom, "chr1");
        assert!(blocks[0].is_candidate);
        assert_eq!(blocks[0].length(), 2000);
    }

    #[test]
    fn test_detect_pipeline() {
        let gff = "\
chr1\tRepeatMasker\tsimilarity\t1000\t3000\t2.8\t+\t.\tTarget \"Motif:Tgut716A\" 1 2001
chr1\tRepeatMasker\tsimilarity\t5000\t6000\t5.1\t+\t.\tTarget \"Motif:Tgut716A\" 1 1001
chr2\tRepeatMasker\tsimilarity\t1500\t1900\t3.9\t+\t.\tTarget \"Motif:Tgut716A\" 1 401
chr3\tRepeatMasker\tsimilarity\t2000\t4000\t7.2\t+\t.\tTarget \"Motif:Tgut716A\" 1 2001
";
        let track = BedGraphTrack::from_records(vec![
            ("chr1".to_string(), 1200, 1250, 0.16),
            ("chr1".to_string(), 1500, 1550, 0.02),
            ("chr1".to_string(), 1800, 1850, 0.03),
            ("chr1".to_string(), 2100, 2150, 0.20),
            ("chr1".to_string(), 2500, 2550, 0.09),
            ("chr1".to_string(), 5100, 5200, 0.30),
            ("chr1".to_string(), 5500, 5600, 0.40),
            ("chr3".to_string(), 100, 200, 0.5),
        ]);

        let index = BlockIndex::from_gff(gff.as_bytes(), "Tgut716A", 1000);
        let results = detect_centromeres(&index, &track, 0.7);

        // chr2 fails the length filter, chr3 has no overlapping signal
        assert_eq!(results.len(), 1);
        let (selection, sites) = &results[0];
        assert_eq!(selection.block.chrom, "chr1");
        assert_eq!(selection.block.start, 1000);
        assert_eq!(sites.len(), 2);
        assert!(sites.iter().all(|s| {
            s.position >= selection.block.start && s.position < selection.block.end
        }));
    }
}
