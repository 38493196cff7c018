use std::io::{BufRead, BufReader, BufWriter, Write};

/// Open an input for buffered reading.
///
/// `stdin` reads standard input; a path ending in `.gz` is decompressed
/// transparently.
///
/// ```
/// use std::io::BufRead;
/// let reader = cendet::reader("tests/cendet/repeats.gff");
/// assert_eq!(reader.lines().count(), 9);
/// ```
pub fn reader(input: &str) -> Box<dyn BufRead> {
    let reader: Box<dyn BufRead> = if input == "stdin" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let path = std::path::Path::new(input);
        let file = match std::fs::File::open(path) {
            Err(why) => panic!("could not open {}: {}", path.display(), why),
            Ok(file) => file,
        };

        if path.extension() == Some(std::ffi::OsStr::new("gz")) {
            Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        }
    };

    reader
}

/// Open an output for buffered writing. `stdout` writes to the screen.
pub fn writer(output: &str) -> Box<dyn Write> {
    let writer: Box<dyn Write> = if output == "stdout" {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        Box::new(BufWriter::new(std::fs::File::create(output).unwrap()))
    };

    writer
}
