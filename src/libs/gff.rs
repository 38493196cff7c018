use lazy_static::lazy_static;
use regex::Regex;
use std::io::BufRead;

/// Source column written into emitted annotation lines.
pub const ANNOT_SOURCE: &str = "cendet";

lazy_static! {
    // RepeatMasker styles: `Target "Motif:Tgut716A" 1 2001` and `Target=Motif:Tgut716A 1 2001`
    static ref TARGET_RE: Regex =
        Regex::new(r#"Target[ =]"?(?:[^":;\s]+:)?([^";\s]+)"?"#).unwrap();
}

//----------------------------
// GffRecord
//----------------------------
#[derive(Debug, Clone, Default)]
pub struct GffRecord {
    pub chrom: String,
    pub source: String,
    pub feature: String,
    pub start: u64, // column 4, kept as written
    pub end: u64,   // column 5, kept as written
    pub score: String,
    pub strand: String,
    pub frame: String,
    pub attributes: String,
}

impl GffRecord {
    /// Parse one tab-separated annotation line.
    ///
    /// At least five fields (chrom, source, feature, start, end) are
    /// required; missing trailing columns default to `.` / empty.
    ///
    /// ```
    /// # use cendet::libs::gff::GffRecord;
    /// let line = "chr1\tRepeatMasker\tsimilarity\t1000\t3000\t2.8\t+\t.\tTarget \"Motif:Tgut716A\" 1 2001";
    /// let rec = GffRecord::parse(line).unwrap();
    /// assert_eq!(rec.chrom, "chr1");
    /// assert_eq!(rec.start, 1000);
    /// assert_eq!(rec.length(), 2000);
    /// assert!(rec.has_token("Tgut716A"));
    /// ```
    pub fn parse(line: &str) -> anyhow::Result<GffRecord> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() < 5 {
            anyhow::bail!("fewer than 5 fields: {}", line.trim_end());
        }

        let start: u64 = fields[3]
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid start `{}`: {}", fields[3], line.trim_end()))?;
        let end: u64 = fields[4]
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid end `{}`: {}", fields[4], line.trim_end()))?;
        if end < start {
            anyhow::bail!("inverted coordinates {}-{}: {}", start, end, line.trim_end());
        }

        Ok(GffRecord {
            chrom: fields[0].to_string(),
            source: fields[1].to_string(),
            feature: fields[2].to_string(),
            start,
            end,
            score: fields.get(5).unwrap_or(&".").to_string(),
            strand: fields.get(6).unwrap_or(&".").to_string(),
            frame: fields.get(7).unwrap_or(&".").to_string(),
            attributes: fields.get(8).unwrap_or(&"").to_string(),
        })
    }

    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    /// Substring match against the raw attribute string.
    ///
    /// ```
    /// # use cendet::libs::gff::GffRecord;
    /// let rec = GffRecord::parse("chr1\trm\tsimilarity\t10\t20\t.\t+\t.\tTarget \"Motif:Tgut716A\" 1 11").unwrap();
    /// assert!(rec.has_token("Tgut716A"));
    /// assert!(!rec.has_token("Tgut191A"));
    /// ```
    pub fn has_token(&self, token: &str) -> bool {
        self.attributes.contains(token)
    }

    /// Extract the repeat name from a `Target` attribute, if present.
    ///
    /// ```
    /// # use cendet::libs::gff::GffRecord;
    /// let rec = GffRecord::parse("chr1\trm\tsimilarity\t10\t20\t.\t+\t.\tTarget \"Motif:Tgut191A\" 1 11").unwrap();
    /// assert_eq!(rec.target_name(), Some("Tgut191A".to_string()));
    /// ```
    pub fn target_name(&self) -> Option<String> {
        TARGET_RE
            .captures(&self.attributes)
            .map(|caps| caps[1].to_string())
    }
}

//----------------------------
// GffReader
//----------------------------
pub struct GffReader<R> {
    reader: R,
    line_buf: String,
    done: bool,
}

impl<R: BufRead> GffReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: inner,
            line_buf: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for GffReader<R> {
    type Item = anyhow::Result<GffRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.line_buf.clear();
            match self.reader.read_line(&mut self.line_buf) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    let line = self.line_buf.trim_end();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    return Some(GffRecord::parse(line));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(anyhow::Error::new(e)));
                }
            }
        }
    }
}

//----------------------------
// Emitters
//----------------------------

/// Write a selected centromere block, with the block mean appended to its
/// attribute string.
pub fn write_centromere<W: std::io::Write>(
    writer: &mut W,
    chrom: &str,
    start: u64,
    end: u64,
    attributes: &str,
    mean_signal: f64,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{}\t{}\tcentromere\t{}\t{}\t.\t.\t.\t{};average_methylation={}",
        chrom, ANNOT_SOURCE, start, end, attributes, mean_signal
    )
}

/// Write one kinetochore binding site as a 1 bp feature.
pub fn write_kinetochore_site<W: std::io::Write>(
    writer: &mut W,
    chrom: &str,
    position: u64,
    value: f64,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{}\t{}\tkinetochore_binding_site\t{}\t{}\t.\t.\t.\tmethylation={}",
        chrom,
        ANNOT_SOURCE,
        position,
        position + 1,
        value
    )
}
