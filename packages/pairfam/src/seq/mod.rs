pub mod consensus;
pub mod hamming;
pub mod locus;
pub mod translate;
