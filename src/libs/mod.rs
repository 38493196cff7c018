pub mod centromere;
pub mod gff;
pub mod io;
pub mod signal;
